//! Neo4j backend over Bolt.
//!
//! One `neo4rs::Graph` with a single pooled connection per run. Every
//! method issues one auto-committed statement, except `create_follows`
//! which checks endpoints before creating.

use std::collections::BTreeSet;

use async_trait::async_trait;
use neo4rs::{
    query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Row,
};

use crate::config::GraphConfig;
use crate::index::IndexSpec;
use crate::model::{BondNode, BookNode, BookSample, FollowsEdge};
use crate::retry::Connector;
use crate::storage::GraphEntity;
use crate::{Error, Result};
use super::GraphStore;

/// Graph store backed by an external Neo4j server.
pub struct BoltGraphStore {
    graph: Graph,
    endpoint: String,
}

impl BoltGraphStore {
    /// Open a connection and prove it with a round trip.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .max_connections(1);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo_config = builder.build().map_err(graph_err)?;
        let graph = Graph::connect(neo_config).await.map_err(graph_err)?;

        let store = Self { graph, endpoint: config.endpoint() };
        store.ping().await?;
        tracing::info!(endpoint = %store.endpoint, "Connected to graph store");
        Ok(store)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn rows(&self, q: Query) -> Result<Vec<Row>> {
        let mut stream = self.graph.execute(q).await.map_err(graph_err)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(graph_err)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn scalar(&self, q: Query, column: &str) -> Result<u64> {
        let mut stream = self.graph.execute(q).await.map_err(graph_err)?;
        match stream.next().await.map_err(graph_err)? {
            Some(row) => Ok(get::<i64>(&row, column)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

// ============================================================================
// Parameter and row helpers
// ============================================================================

fn graph_err(e: neo4rs::Error) -> Error {
    let message = e.to_string();
    if message.contains("ConstraintValidationFailed") {
        Error::ConstraintViolation(message)
    } else {
        Error::Graph(message)
    }
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> Result<T> {
    row.get::<T>(column)
        .map_err(|e| Error::Graph(format!("column `{column}`: {e}")))
}

fn text(value: &str) -> BoltType {
    BoltType::String(BoltString::from(value))
}

fn opt_text(value: Option<&str>) -> BoltType {
    value.map_or(BoltType::Null(BoltNull), text)
}

fn list(items: impl IntoIterator<Item = BoltType>) -> BoltType {
    let mut list = BoltList::new();
    for item in items {
        list.push(item);
    }
    BoltType::List(list)
}

fn map<const N: usize>(entries: [(&str, BoltType); N]) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in entries {
        map.put(BoltString::from(key), value);
    }
    BoltType::Map(map)
}

fn bond_param(bond: &BondNode) -> BoltType {
    map([
        ("id", text(&bond.id)),
        ("adj", text(&bond.adj)),
        ("noun", text(&bond.noun)),
        ("A", BoltType::from(bond.a)),
        ("S", BoltType::from(bond.s)),
        ("tau", BoltType::from(bond.tau)),
        ("source", text(&bond.source)),
    ])
}

fn follows_param(edge: &FollowsEdge) -> BoltType {
    map([
        ("from_id", text(&edge.from_id)),
        ("to_id", text(&edge.to_id)),
        ("weight", BoltType::from(edge.weight)),
        ("source", text(&edge.source)),
        ("book_id", opt_text(edge.book_id.as_deref())),
    ])
}

fn book_param(book: &BookNode) -> BoltType {
    map([
        ("id", text(&book.id)),
        ("title", text(&book.title)),
        ("author", text(&book.author)),
        ("filename", text(&book.filename)),
        ("genre", text(&book.genre)),
    ])
}

fn window(q: Query, skip: u64, limit: usize) -> Query {
    q.param("skip", skip as i64).param("limit", limit as i64)
}

// ============================================================================
// Cypher
// ============================================================================

const FETCH_BOOKS: &str = "\
    MATCH (b:Book) \
    OPTIONAL MATCH (a:Author)-[:WROTE]->(b) \
    WITH b, head(collect(a.name)) AS wrote_by \
    RETURN toString(b.id) AS id, coalesce(b.title, '') AS title, \
           coalesce(b.author, wrote_by, '') AS author, \
           coalesce(b.filename, '') AS filename, coalesce(b.genre, '') AS genre \
    ORDER BY id SKIP $skip LIMIT $limit";

const FETCH_BONDS: &str = "\
    MATCH (b:Bond) \
    RETURN toString(b.id) AS id, coalesce(b.adj, '') AS adj, coalesce(b.noun, '') AS noun, \
           coalesce(toFloat(b.A), 0.0) AS A, coalesce(toFloat(b.S), 0.0) AS S, \
           coalesce(toFloat(b.tau), 2.5) AS tau, coalesce(b.source, 'corpus') AS source \
    ORDER BY b.id SKIP $skip LIMIT $limit";

const FETCH_FOLLOWS: &str = "\
    MATCH (a:Bond)-[r:FOLLOWS]->(b:Bond) \
    RETURN toString(a.id) AS from_id, toString(b.id) AS to_id, \
           coalesce(toFloat(r.weight), 1.0) AS weight, coalesce(r.source, 'corpus') AS source, \
           coalesce(toString(r.book_id), '') AS book_id, elementId(r) AS edge_key \
    ORDER BY from_id, to_id, book_id, source, edge_key SKIP $skip LIMIT $limit";

const CREATE_BONDS: &str = "\
    UNWIND $bonds AS b \
    CREATE (:Bond {id: b.id, adj: b.adj, noun: b.noun, A: b.A, S: b.S, tau: b.tau, source: b.source})";

const MISSING_BONDS: &str = "\
    UNWIND $ids AS id \
    OPTIONAL MATCH (b:Bond {id: id}) \
    WITH id, b WHERE b IS NULL \
    RETURN collect(id)[..5] AS missing";

const CREATE_FOLLOWS: &str = "\
    UNWIND $edges AS e \
    MATCH (a:Bond {id: e.from_id}) \
    MATCH (b:Bond {id: e.to_id}) \
    CREATE (a)-[:FOLLOWS {weight: e.weight, source: e.source, book_id: e.book_id}]->(b)";

const MERGE_BOOKS: &str = "\
    UNWIND $books AS b \
    MERGE (n:Book {id: b.id}) \
    SET n.title = b.title, n.author = b.author, n.filename = b.filename, n.genre = b.genre \
    RETURN count(n) AS merged";

const MERGE_AUTHORS: &str = "\
    UNWIND $links AS l \
    MERGE (a:Author {name: l.author}) \
    WITH a, l \
    MATCH (b:Book {id: l.book_id}) \
    MERGE (a)-[:WROTE]->(b) \
    RETURN count(*) AS linked";

// Served by the FOLLOWS(book_id) relationship index.
const BONDS_IN_BOOK: &str = "\
    MATCH (a:Bond)-[r:FOLLOWS]->(b:Bond) \
    WHERE r.book_id = $book_id \
    UNWIND [a.id, b.id] AS id \
    RETURN DISTINCT toString(id) AS id \
    ORDER BY id";

const MERGE_CONTAINS: &str = "\
    MATCH (book:Book {id: $book_id}) \
    UNWIND $bond_ids AS bond_id \
    MATCH (bond:Bond {id: bond_id}) \
    WHERE NOT (book)-[:CONTAINS]->(bond) \
    MERGE (book)-[:CONTAINS]->(bond) \
    RETURN count(*) AS created";

const TOP_BOOKS: &str = "\
    MATCH (b:Book) \
    OPTIONAL MATCH (b)-[:CONTAINS]->(bond:Bond) \
    RETURN toString(b.id) AS id, coalesce(b.title, '') AS title, \
           coalesce(b.author, '') AS author, count(bond) AS bonds \
    ORDER BY bonds DESC, id LIMIT $limit";

fn delete_statement(entity: GraphEntity) -> String {
    let name = entity.graph_name();
    if entity.is_relationship() {
        format!("MATCH ()-[r:{name}]->() WITH r LIMIT $limit DELETE r RETURN count(*) AS deleted")
    } else {
        format!("MATCH (n:{name}) WITH n LIMIT $limit DETACH DELETE n RETURN count(*) AS deleted")
    }
}

fn count_statement(entity: GraphEntity) -> String {
    let name = entity.graph_name();
    if entity.is_relationship() {
        format!("MATCH ()-[r:{name}]->() RETURN count(r) AS n")
    } else {
        format!("MATCH (n:{name}) RETURN count(n) AS n")
    }
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for BoltGraphStore {
    async fn ping(&self) -> Result<()> {
        self.scalar(query("RETURN 1 AS ok"), "ok").await.map(|_| ())
    }

    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<()> {
        for spec in specs {
            self.graph.run(query(&spec.to_cypher())).await.map_err(graph_err)?;
            tracing::debug!(index = %spec.name(), "Index ensured");
        }
        Ok(())
    }

    async fn delete_batch(&self, entity: GraphEntity, limit: usize) -> Result<u64> {
        let q = query(&delete_statement(entity)).param("limit", limit as i64);
        self.scalar(q, "deleted").await
    }

    // ========================================================================
    // Export
    // ========================================================================

    async fn fetch_books(&self, skip: u64, limit: usize) -> Result<Vec<BookNode>> {
        let rows = self.rows(window(query(FETCH_BOOKS), skip, limit)).await?;
        rows.iter()
            .map(|row| {
                Ok(BookNode {
                    id: get(row, "id")?,
                    title: get(row, "title")?,
                    author: get(row, "author")?,
                    filename: get(row, "filename")?,
                    genre: get(row, "genre")?,
                })
            })
            .collect()
    }

    async fn fetch_bonds(&self, skip: u64, limit: usize) -> Result<Vec<BondNode>> {
        let rows = self.rows(window(query(FETCH_BONDS), skip, limit)).await?;
        rows.iter()
            .map(|row| {
                Ok(BondNode {
                    id: get(row, "id")?,
                    adj: get(row, "adj")?,
                    noun: get(row, "noun")?,
                    a: get(row, "A")?,
                    s: get(row, "S")?,
                    tau: get(row, "tau")?,
                    source: get(row, "source")?,
                })
            })
            .collect()
    }

    async fn fetch_follows(&self, skip: u64, limit: usize) -> Result<Vec<FollowsEdge>> {
        let rows = self.rows(window(query(FETCH_FOLLOWS), skip, limit)).await?;
        rows.iter()
            .map(|row| {
                let book_id: String = get(row, "book_id")?;
                Ok(FollowsEdge {
                    from_id: get(row, "from_id")?,
                    to_id: get(row, "to_id")?,
                    weight: get(row, "weight")?,
                    source: get(row, "source")?,
                    book_id: (!book_id.is_empty()).then_some(book_id),
                })
            })
            .collect()
    }

    // ========================================================================
    // Import
    // ========================================================================

    async fn create_bonds(&self, bonds: &[BondNode]) -> Result<u64> {
        let q = query(CREATE_BONDS).param("bonds", list(bonds.iter().map(bond_param)));
        self.graph.run(q).await.map_err(graph_err)?;
        Ok(bonds.len() as u64)
    }

    async fn create_follows(&self, edges: &[FollowsEdge]) -> Result<u64> {
        let ids: BTreeSet<&str> = edges.iter().flat_map(|e| e.endpoints()).collect();
        let check = query(MISSING_BONDS).param("ids", list(ids.into_iter().map(text)));
        if let Some(row) = self.rows(check).await?.first() {
            let missing: Vec<String> = get(row, "missing")?;
            if !missing.is_empty() {
                return Err(Error::ReferentialIntegrity(format!(
                    "FOLLOWS endpoints do not exist: {}",
                    missing.join(", ")
                )));
            }
        }

        let q = query(CREATE_FOLLOWS).param("edges", list(edges.iter().map(follows_param)));
        self.graph.run(q).await.map_err(graph_err)?;
        Ok(edges.len() as u64)
    }

    async fn merge_books(&self, books: &[BookNode]) -> Result<u64> {
        let q = query(MERGE_BOOKS).param("books", list(books.iter().map(book_param)));
        self.scalar(q, "merged").await
    }

    async fn merge_authors(&self, books: &[BookNode]) -> Result<u64> {
        let links: Vec<BoltType> = books
            .iter()
            .filter_map(|book| {
                let author = book.author_node()?;
                Some(map([("author", text(&author.name)), ("book_id", text(&book.id))]))
            })
            .collect();
        if links.is_empty() {
            return Ok(0);
        }
        self.scalar(query(MERGE_AUTHORS).param("links", list(links)), "linked").await
    }

    // ========================================================================
    // Containment
    // ========================================================================

    async fn book_ids(&self) -> Result<Vec<String>> {
        let rows = self.rows(query("MATCH (b:Book) RETURN toString(b.id) AS id ORDER BY id")).await?;
        rows.iter().map(|row| get(row, "id")).collect()
    }

    async fn bonds_in_book(&self, book_id: &str) -> Result<Vec<String>> {
        let rows = self.rows(query(BONDS_IN_BOOK).param("book_id", book_id)).await?;
        rows.iter().map(|row| get(row, "id")).collect()
    }

    async fn merge_contains(&self, book_id: &str, bond_ids: &[String]) -> Result<u64> {
        let q = query(MERGE_CONTAINS)
            .param("book_id", book_id)
            .param("bond_ids", list(bond_ids.iter().map(|id| text(id))));
        self.scalar(q, "created").await
    }

    // ========================================================================
    // Verification
    // ========================================================================

    async fn count(&self, entity: GraphEntity) -> Result<u64> {
        self.scalar(query(&count_statement(entity)), "n").await
    }

    async fn top_books(&self, limit: usize) -> Result<Vec<BookSample>> {
        let rows = self.rows(query(TOP_BOOKS).param("limit", limit as i64)).await?;
        rows.iter()
            .map(|row| {
                Ok(BookSample {
                    id: get(row, "id")?,
                    title: get(row, "title")?,
                    author: get(row, "author")?,
                    bonds: get::<i64>(row, "bonds")?.max(0) as u64,
                })
            })
            .collect()
    }
}

// ============================================================================
// Connector impl
// ============================================================================

#[async_trait]
impl Connector for GraphConfig {
    type Store = BoltGraphStore;

    fn endpoint(&self) -> String {
        GraphConfig::endpoint(self)
    }

    async fn connect(&self) -> Result<BoltGraphStore> {
        BoltGraphStore::connect(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_statements_are_bounded() {
        for entity in GraphEntity::CLEAR_ORDER {
            let statement = delete_statement(entity);
            assert!(statement.contains("LIMIT $limit"), "{statement}");
        }
        assert!(delete_statement(GraphEntity::Follows).starts_with("MATCH ()-[r:FOLLOWS]"));
        assert!(delete_statement(GraphEntity::Bonds).contains("DETACH DELETE"));
    }

    #[test]
    fn test_follows_pages_have_a_total_order() {
        let order = FETCH_FOLLOWS.split("ORDER BY").nth(1).unwrap();
        assert!(order.contains("from_id, to_id, book_id, source, edge_key"), "{order}");
        assert!(FETCH_FOLLOWS.contains("elementId(r) AS edge_key"));
    }

    #[test]
    fn test_count_statement() {
        assert_eq!(count_statement(GraphEntity::Contains), "MATCH ()-[r:CONTAINS]->() RETURN count(r) AS n");
        assert_eq!(count_statement(GraphEntity::Authors), "MATCH (n:Author) RETURN count(n) AS n");
    }
}
