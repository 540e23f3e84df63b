//! Relational store contract.
//!
//! Conflict policy per table:
//!
//! | Table | On key conflict |
//! |-------|-----------------|
//! | `word_coordinates` | replace A, S, tau, source |
//! | `bonds` | replace A, S, tau |
//! | `hyp_bond_vocab` | `total_count` adds, other fields last-written |
//! | `learned_bonds` | keep existing row |
//!
//! Upserts that update on conflict require keys to be unique within one
//! call; `RelationalStoreClient` deduplicates before calling.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::{BondVocabEntry, LearnedBond, RelationalBond, WordCoordinate};
use crate::Result;
use super::Table;

pub use memory::MemoryRelationalStore;
#[cfg(feature = "postgres")]
pub use postgres::PgRelationalStore;

/// Idempotent DDL, run once before any load.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS word_coordinates (
        word VARCHAR(100) PRIMARY KEY,
        a FLOAT NOT NULL DEFAULT 0,
        s FLOAT NOT NULL DEFAULT 0,
        tau FLOAT NOT NULL DEFAULT 2.5,
        source VARCHAR(50),
        created_at TIMESTAMP DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS bonds (
        id SERIAL PRIMARY KEY,
        adj VARCHAR(100) NOT NULL,
        noun VARCHAR(100) NOT NULL,
        a FLOAT,
        s FLOAT,
        tau FLOAT DEFAULT 2.5,
        variety VARCHAR(50),
        UNIQUE (adj, noun)
    )",
    "CREATE TABLE IF NOT EXISTS hyp_bond_vocab (
        bond VARCHAR(200) PRIMARY KEY,
        first_seen_order INTEGER,
        first_seen_book UUID,
        total_count INTEGER NOT NULL DEFAULT 1,
        book_count INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS learned_bonds (
        id SERIAL PRIMARY KEY,
        adj VARCHAR(100) NOT NULL,
        noun VARCHAR(100) NOT NULL,
        a FLOAT NOT NULL DEFAULT 0,
        s FLOAT NOT NULL DEFAULT 0,
        tau FLOAT NOT NULL DEFAULT 2.5,
        source VARCHAR(50) DEFAULT 'user',
        confidence FLOAT DEFAULT 1.0,
        use_count INTEGER DEFAULT 1,
        created_at TIMESTAMP DEFAULT NOW(),
        UNIQUE (adj, noun)
    )",
    "CREATE INDEX IF NOT EXISTS idx_bonds_adj ON bonds (adj)",
    "CREATE INDEX IF NOT EXISTS idx_bonds_noun ON bonds (noun)",
    "CREATE INDEX IF NOT EXISTS idx_vocab_total ON hyp_bond_vocab (total_count DESC)",
    "CREATE INDEX IF NOT EXISTS idx_learned_adj ON learned_bonds (adj)",
];

/// Operations the migration engine needs from a relational database.
///
/// Methods take `&mut self`: a handle owns exactly one connection.
#[async_trait]
pub trait RelationalStore: Send {
    async fn ping(&mut self) -> Result<()>;

    /// Run the idempotent schema DDL.
    async fn ensure_schema(&mut self) -> Result<()>;

    async fn truncate(&mut self, table: Table) -> Result<()>;

    async fn count(&mut self, table: Table) -> Result<u64>;

    // ========================================================================
    // Export (cursor streams, ordered by key)
    // ========================================================================

    fn stream_word_coordinates(&mut self) -> BoxStream<'_, Result<WordCoordinate>>;

    fn stream_bond_vocab(&mut self) -> BoxStream<'_, Result<BondVocabEntry>>;

    fn stream_learned_bonds(&mut self) -> BoxStream<'_, Result<LearnedBond>>;

    // ========================================================================
    // Import
    // ========================================================================

    async fn upsert_word_coordinates(&mut self, rows: &[WordCoordinate]) -> Result<u64>;

    async fn upsert_bonds(&mut self, rows: &[RelationalBond]) -> Result<u64>;

    /// Returns how many rows were actually inserted.
    async fn insert_learned_bonds(&mut self, rows: &[LearnedBond]) -> Result<u64>;

    /// Bulk-copy into a staging area, then merge with accumulating
    /// `total_count`. One transaction per call.
    async fn copy_bond_vocab(&mut self, rows: &[BondVocabEntry]) -> Result<u64>;

    // ========================================================================
    // Verification
    // ========================================================================

    /// Most frequent vocabulary entries, largest first.
    async fn top_vocab(&mut self, limit: usize) -> Result<Vec<BondVocabEntry>>;
}
