//! PostgreSQL backend.
//!
//! Owns one `PgConnection` for the whole run. Batch upserts bind column
//! arrays and `UNNEST` them, so a batch is one statement and one round trip.
//! The vocabulary table goes through `COPY ... FROM STDIN` into a temporary
//! staging table and is merged from there.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, PgConnection, Row};

use crate::codec::RecordWriter;
use crate::config::RelationalConfig;
use crate::model::{BondVocabEntry, LearnedBond, RelationalBond, WordCoordinate, DEFAULT_AXIS, DEFAULT_TAU};
use crate::retry::Connector;
use crate::storage::Table;
use crate::{Error, Result};
use super::{RelationalStore, SCHEMA};

/// Relational store backed by an external PostgreSQL server.
pub struct PgRelationalStore {
    conn: PgConnection,
    endpoint: String,
}

impl PgRelationalStore {
    pub async fn connect(config: &RelationalConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);
        let conn = PgConnection::connect_with(&options).await.map_err(rel_err)?;

        let mut store = Self { conn, endpoint: config.endpoint() };
        store.ping().await?;
        tracing::info!(endpoint = %store.endpoint, "Connected to relational store");
        Ok(store)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn rel_err(e: sqlx::Error) -> Error {
    Error::Relational(e.to_string())
}

// ============================================================================
// SQL
// ============================================================================

const UPSERT_WORD_COORDINATES: &str = "
    INSERT INTO word_coordinates (word, a, s, tau, source, created_at)
    SELECT word, a, s, tau, source, COALESCE(created_at, NOW())
    FROM UNNEST($1::varchar[], $2::float8[], $3::float8[], $4::float8[], $5::varchar[], $6::timestamp[])
        AS t(word, a, s, tau, source, created_at)
    ON CONFLICT (word) DO UPDATE
    SET a = EXCLUDED.a, s = EXCLUDED.s, tau = EXCLUDED.tau, source = EXCLUDED.source";

const UPSERT_BONDS: &str = "
    INSERT INTO bonds (adj, noun, a, s, tau, variety)
    SELECT * FROM UNNEST($1::varchar[], $2::varchar[], $3::float8[], $4::float8[], $5::float8[], $6::varchar[])
    ON CONFLICT (adj, noun) DO UPDATE
    SET a = EXCLUDED.a, s = EXCLUDED.s, tau = EXCLUDED.tau";

const INSERT_LEARNED_BONDS: &str = "
    INSERT INTO learned_bonds (adj, noun, a, s, tau, source, confidence, use_count)
    SELECT * FROM UNNEST($1::varchar[], $2::varchar[], $3::float8[], $4::float8[], $5::float8[],
                         $6::varchar[], $7::float8[], $8::int4[])
    ON CONFLICT (adj, noun) DO NOTHING";

const CREATE_VOCAB_STAGE: &str = "
    CREATE TEMP TABLE IF NOT EXISTS hyp_bond_vocab_stage
        (LIKE hyp_bond_vocab INCLUDING DEFAULTS) ON COMMIT DELETE ROWS";

const COPY_VOCAB_STAGE: &str = "
    COPY hyp_bond_vocab_stage (bond, first_seen_order, first_seen_book, total_count, book_count, created_at)
    FROM STDIN WITH (FORMAT csv, HEADER true)";

const MERGE_VOCAB_STAGE: &str = "
    INSERT INTO hyp_bond_vocab (bond, first_seen_order, first_seen_book, total_count, book_count, created_at)
    SELECT bond, first_seen_order, first_seen_book, total_count, book_count, COALESCE(created_at, NOW())
    FROM hyp_bond_vocab_stage
    ON CONFLICT (bond) DO UPDATE
    SET total_count = hyp_bond_vocab.total_count + EXCLUDED.total_count,
        first_seen_order = EXCLUDED.first_seen_order,
        first_seen_book = EXCLUDED.first_seen_book,
        book_count = EXCLUDED.book_count";

const SELECT_WORD_COORDINATES: &str =
    "SELECT word, a, s, tau, COALESCE(source, '') AS source, created_at FROM word_coordinates ORDER BY word";

const SELECT_BOND_VOCAB: &str = "
    SELECT bond, first_seen_order, first_seen_book, total_count, book_count, created_at
    FROM hyp_bond_vocab ORDER BY bond";

const SELECT_LEARNED_BONDS: &str = "
    SELECT adj, noun, a, s, tau, COALESCE(source, 'user') AS source,
           COALESCE(confidence, 1.0) AS confidence, COALESCE(use_count, 1) AS use_count
    FROM learned_bonds ORDER BY adj, noun";

const TOP_VOCAB: &str = "
    SELECT bond, first_seen_order, first_seen_book, total_count, book_count, created_at
    FROM hyp_bond_vocab ORDER BY total_count DESC, bond LIMIT $1";

// ============================================================================
// Row mapping
// ============================================================================

// Older deployments created the numeric columns nullable. NULL reads as the
// model default.

fn axis(row: &PgRow, column: &str) -> sqlx::Result<f64> {
    Ok(row.try_get::<Option<f64>, _>(column)?.unwrap_or(DEFAULT_AXIS))
}

fn tau(row: &PgRow) -> sqlx::Result<f64> {
    Ok(row.try_get::<Option<f64>, _>("tau")?.unwrap_or(DEFAULT_TAU))
}

fn count_or_one(row: &PgRow, column: &str) -> sqlx::Result<i32> {
    Ok(row.try_get::<Option<i32>, _>(column)?.unwrap_or(1))
}

fn word_coordinate(row: PgRow) -> sqlx::Result<WordCoordinate> {
    Ok(WordCoordinate {
        word: row.try_get("word")?,
        a: axis(&row, "a")?,
        s: axis(&row, "s")?,
        tau: tau(&row)?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

fn vocab_entry(row: PgRow) -> sqlx::Result<BondVocabEntry> {
    Ok(BondVocabEntry {
        bond: row.try_get("bond")?,
        first_seen_order: row.try_get("first_seen_order")?,
        first_seen_book: row.try_get("first_seen_book")?,
        total_count: count_or_one(&row, "total_count")?,
        book_count: count_or_one(&row, "book_count")?,
        created_at: row.try_get("created_at")?,
    })
}

fn learned_bond(row: PgRow) -> sqlx::Result<LearnedBond> {
    Ok(LearnedBond {
        adj: row.try_get("adj")?,
        noun: row.try_get("noun")?,
        a: axis(&row, "a")?,
        s: axis(&row, "s")?,
        tau: tau(&row)?,
        source: row.try_get("source")?,
        confidence: row.try_get::<Option<f64>, _>("confidence")?.unwrap_or(1.0),
        use_count: count_or_one(&row, "use_count")?,
    })
}

// ============================================================================
// RelationalStore impl
// ============================================================================

#[async_trait]
impl RelationalStore for PgRelationalStore {
    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await.map_err(rel_err)
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut self.conn).await.map_err(rel_err)?;
        }
        Ok(())
    }

    async fn truncate(&mut self, table: Table) -> Result<()> {
        let statement = format!("TRUNCATE TABLE {} RESTART IDENTITY", table.name());
        sqlx::query(&statement).execute(&mut self.conn).await.map_err(rel_err)?;
        Ok(())
    }

    async fn count(&mut self, table: Table) -> Result<u64> {
        let statement = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = sqlx::query_scalar(&statement)
            .fetch_one(&mut self.conn)
            .await
            .map_err(rel_err)?;
        Ok(n.max(0) as u64)
    }

    fn stream_word_coordinates(&mut self) -> BoxStream<'_, Result<WordCoordinate>> {
        sqlx::query(SELECT_WORD_COORDINATES)
            .fetch(&mut self.conn)
            .map(|row| row.and_then(word_coordinate).map_err(rel_err))
            .boxed()
    }

    fn stream_bond_vocab(&mut self) -> BoxStream<'_, Result<BondVocabEntry>> {
        sqlx::query(SELECT_BOND_VOCAB)
            .fetch(&mut self.conn)
            .map(|row| row.and_then(vocab_entry).map_err(rel_err))
            .boxed()
    }

    fn stream_learned_bonds(&mut self) -> BoxStream<'_, Result<LearnedBond>> {
        sqlx::query(SELECT_LEARNED_BONDS)
            .fetch(&mut self.conn)
            .map(|row| row.and_then(learned_bond).map_err(rel_err))
            .boxed()
    }

    async fn upsert_word_coordinates(&mut self, rows: &[WordCoordinate]) -> Result<u64> {
        let result = sqlx::query(UPSERT_WORD_COORDINATES)
            .bind(rows.iter().map(|r| r.word.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.a).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.s).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.tau).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.source.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.created_at).collect::<Vec<_>>())
            .execute(&mut self.conn)
            .await
            .map_err(rel_err)?;
        Ok(result.rows_affected())
    }

    async fn upsert_bonds(&mut self, rows: &[RelationalBond]) -> Result<u64> {
        let result = sqlx::query(UPSERT_BONDS)
            .bind(rows.iter().map(|r| r.adj.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.noun.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.a).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.s).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.tau).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.variety.clone()).collect::<Vec<_>>())
            .execute(&mut self.conn)
            .await
            .map_err(rel_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_learned_bonds(&mut self, rows: &[LearnedBond]) -> Result<u64> {
        let result = sqlx::query(INSERT_LEARNED_BONDS)
            .bind(rows.iter().map(|r| r.adj.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.noun.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.a).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.s).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.tau).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.source.clone()).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.confidence).collect::<Vec<_>>())
            .bind(rows.iter().map(|r| r.use_count).collect::<Vec<_>>())
            .execute(&mut self.conn)
            .await
            .map_err(rel_err)?;
        Ok(result.rows_affected())
    }

    async fn copy_bond_vocab(&mut self, rows: &[BondVocabEntry]) -> Result<u64> {
        let mut writer = RecordWriter::<BondVocabEntry, Vec<u8>>::from_writer(Vec::new())?;
        writer.write_all(rows)?;
        let payload = writer.into_inner()?;

        let mut tx = self.conn.begin().await.map_err(rel_err)?;
        sqlx::query(CREATE_VOCAB_STAGE).execute(&mut *tx).await.map_err(rel_err)?;

        let mut copy = tx.copy_in_raw(COPY_VOCAB_STAGE).await.map_err(rel_err)?;
        copy.send(payload).await.map_err(rel_err)?;
        let staged = copy.finish().await.map_err(rel_err)?;

        sqlx::query(MERGE_VOCAB_STAGE).execute(&mut *tx).await.map_err(rel_err)?;
        tx.commit().await.map_err(rel_err)?;
        Ok(staged)
    }

    async fn top_vocab(&mut self, limit: usize) -> Result<Vec<BondVocabEntry>> {
        let rows = sqlx::query(TOP_VOCAB)
            .bind(limit as i64)
            .fetch_all(&mut self.conn)
            .await
            .map_err(rel_err)?;
        rows.into_iter().map(|row| vocab_entry(row).map_err(rel_err)).collect()
    }
}

// ============================================================================
// Connector impl
// ============================================================================

#[async_trait]
impl Connector for RelationalConfig {
    type Store = PgRelationalStore;

    fn endpoint(&self) -> String {
        RelationalConfig::endpoint(self)
    }

    async fn connect(&self) -> Result<PgRelationalStore> {
        PgRelationalStore::connect(self).await
    }
}
