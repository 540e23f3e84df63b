//! In-memory graph store.
//!
//! The reference implementation of `GraphStore`, used by tests and by dry
//! runs. Collections are ordered maps so export pages come out in the same
//! order a Cypher `ORDER BY` would give.
//!
//! ## Limitations
//!
//! - **No transactions**: each call applies immediately. A batch that fails
//!   validation writes nothing; a batch that passes is applied whole.
//! - **No persistence**: `Clone` shares state between handles, dropping the
//!   last handle loses everything.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashSet;
use parking_lot::RwLock;

use crate::index::IndexSpec;
use crate::model::{BondNode, BookNode, BookSample, FollowsEdge};
use crate::retry::Connector;
use crate::storage::GraphEntity;
use crate::{Error, Result};
use super::GraphStore;

// ============================================================================
// MemoryGraphStore
// ============================================================================

/// In-memory corpus graph.
#[derive(Clone, Default)]
pub struct MemoryGraphStore {
    inner: Arc<MemoryGraphInner>,
}

#[derive(Default)]
struct MemoryGraphInner {
    bonds: RwLock<BTreeMap<String, BondNode>>,
    books: RwLock<BTreeMap<String, BookNode>>,
    authors: RwLock<BTreeSet<String>>,
    /// (from_id, to_id, insertion seq) → edge; parallel edges are allowed
    follows: RwLock<BTreeMap<(String, String, u64), FollowsEdge>>,
    /// (book_id, bond_id)
    contains: RwLock<BTreeSet<(String, String)>>,
    /// (author name, book_id)
    wrote: RwLock<BTreeSet<(String, String)>>,
    indexes: RwLock<HashSet<IndexSpec>>,
    next_edge_seq: AtomicU64,
    refuse_connects: AtomicU32,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Indexes created so far.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.inner.indexes.read().iter().cloned().collect()
    }

    pub fn bond(&self, id: &str) -> Option<BondNode> {
        self.inner.bonds.read().get(id).cloned()
    }

    /// All CONTAINS pairs, sorted.
    pub fn contains_pairs(&self) -> Vec<(String, String)> {
        self.inner.contains.read().iter().cloned().collect()
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, skip: u64, limit: usize) -> Vec<T> {
    items.skip(skip as usize).take(limit).collect()
}

fn drain_first<K: Ord + Clone, V>(map: &mut BTreeMap<K, V>, limit: usize) -> u64 {
    let keys: Vec<K> = map.keys().take(limit).cloned().collect();
    for key in &keys {
        map.remove(key);
    }
    keys.len() as u64
}

fn drain_first_set<K: Ord + Clone>(set: &mut BTreeSet<K>, limit: usize) -> u64 {
    let keys: Vec<K> = set.iter().take(limit).cloned().collect();
    for key in &keys {
        set.remove(key);
    }
    keys.len() as u64
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<()> {
        self.inner.indexes.write().extend(specs.iter().cloned());
        Ok(())
    }

    async fn delete_batch(&self, entity: GraphEntity, limit: usize) -> Result<u64> {
        let inner = &self.inner;
        let deleted = match entity {
            GraphEntity::Books => drain_first(&mut *inner.books.write(), limit),
            GraphEntity::Bonds => drain_first(&mut *inner.bonds.write(), limit),
            GraphEntity::Follows => drain_first(&mut *inner.follows.write(), limit),
            GraphEntity::Authors => drain_first_set(&mut *inner.authors.write(), limit),
            GraphEntity::Contains => drain_first_set(&mut *inner.contains.write(), limit),
            GraphEntity::Wrote => drain_first_set(&mut *inner.wrote.write(), limit),
        };
        Ok(deleted)
    }

    // ========================================================================
    // Export
    // ========================================================================

    async fn fetch_books(&self, skip: u64, limit: usize) -> Result<Vec<BookNode>> {
        Ok(page(self.inner.books.read().values().cloned(), skip, limit))
    }

    async fn fetch_bonds(&self, skip: u64, limit: usize) -> Result<Vec<BondNode>> {
        Ok(page(self.inner.bonds.read().values().cloned(), skip, limit))
    }

    async fn fetch_follows(&self, skip: u64, limit: usize) -> Result<Vec<FollowsEdge>> {
        Ok(page(self.inner.follows.read().values().cloned(), skip, limit))
    }

    // ========================================================================
    // Import
    // ========================================================================

    async fn create_bonds(&self, bonds: &[BondNode]) -> Result<u64> {
        let mut store = self.inner.bonds.write();
        let mut seen = HashSet::with_capacity(bonds.len());
        for bond in bonds {
            if store.contains_key(&bond.id) || !seen.insert(bond.id.as_str()) {
                return Err(Error::ConstraintViolation(format!(
                    "Bond with id '{}' already exists",
                    bond.id
                )));
            }
        }
        for bond in bonds {
            store.insert(bond.id.clone(), bond.clone());
        }
        Ok(bonds.len() as u64)
    }

    async fn create_follows(&self, edges: &[FollowsEdge]) -> Result<u64> {
        {
            let bonds = self.inner.bonds.read();
            if let Some(missing) = edges
                .iter()
                .flat_map(|e| e.endpoints())
                .find(|id| !bonds.contains_key(*id))
            {
                return Err(Error::ReferentialIntegrity(format!(
                    "FOLLOWS endpoint '{missing}' does not exist"
                )));
            }
        }

        let mut follows = self.inner.follows.write();
        for edge in edges {
            let seq = self.inner.next_edge_seq.fetch_add(1, Ordering::Relaxed);
            follows.insert((edge.from_id.clone(), edge.to_id.clone(), seq), edge.clone());
        }
        Ok(edges.len() as u64)
    }

    async fn merge_books(&self, books: &[BookNode]) -> Result<u64> {
        let mut store = self.inner.books.write();
        for book in books {
            store.insert(book.id.clone(), book.clone());
        }
        Ok(books.len() as u64)
    }

    async fn merge_authors(&self, books: &[BookNode]) -> Result<u64> {
        let mut authors = self.inner.authors.write();
        let mut wrote = self.inner.wrote.write();
        let mut linked = 0;
        for book in books {
            if let Some(author) = book.author_node() {
                wrote.insert((author.name.clone(), book.id.clone()));
                authors.insert(author.name);
                linked += 1;
            }
        }
        Ok(linked)
    }

    // ========================================================================
    // Containment
    // ========================================================================

    async fn book_ids(&self) -> Result<Vec<String>> {
        Ok(self.inner.books.read().keys().cloned().collect())
    }

    async fn bonds_in_book(&self, book_id: &str) -> Result<Vec<String>> {
        let follows = self.inner.follows.read();
        let ids: BTreeSet<&str> = follows
            .values()
            .filter(|e| e.book_id.as_deref() == Some(book_id))
            .flat_map(|e| e.endpoints())
            .collect();
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    async fn merge_contains(&self, book_id: &str, bond_ids: &[String]) -> Result<u64> {
        if !self.inner.books.read().contains_key(book_id) {
            tracing::warn!(book_id, bonds = bond_ids.len(), "CONTAINS skipped, book not found");
            return Ok(0);
        }
        let bonds = self.inner.bonds.read();
        let mut contains = self.inner.contains.write();
        let created = bond_ids
            .iter()
            .filter(|id| bonds.contains_key(*id))
            .filter(|id| contains.insert((book_id.to_string(), (*id).clone())))
            .count();
        Ok(created as u64)
    }

    // ========================================================================
    // Verification
    // ========================================================================

    async fn count(&self, entity: GraphEntity) -> Result<u64> {
        let inner = &self.inner;
        let n = match entity {
            GraphEntity::Books => inner.books.read().len(),
            GraphEntity::Authors => inner.authors.read().len(),
            GraphEntity::Bonds => inner.bonds.read().len(),
            GraphEntity::Follows => inner.follows.read().len(),
            GraphEntity::Contains => inner.contains.read().len(),
            GraphEntity::Wrote => inner.wrote.read().len(),
        };
        Ok(n as u64)
    }

    async fn top_books(&self, limit: usize) -> Result<Vec<BookSample>> {
        let books = self.inner.books.read();
        let contains = self.inner.contains.read();
        let mut samples: Vec<BookSample> = books
            .values()
            .map(|book| BookSample {
                id: book.id.clone(),
                title: book.title.clone(),
                author: book.author.clone(),
                bonds: contains.iter().filter(|(b, _)| *b == book.id).count() as u64,
            })
            .collect();
        samples.sort_by(|a, b| b.bonds.cmp(&a.bonds).then_with(|| a.id.cmp(&b.id)));
        samples.truncate(limit);
        Ok(samples)
    }
}

// ============================================================================
// Connector impl
// ============================================================================

#[async_trait]
impl Connector for MemoryGraphStore {
    type Store = MemoryGraphStore;

    fn endpoint(&self) -> String {
        "memory://graph".to_string()
    }

    async fn connect(&self) -> Result<MemoryGraphStore> {
        let refused = self
            .inner
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match refused {
            Ok(_) => Err(Error::Graph("connection refused".into())),
            Err(_) => Ok(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bonds(ids: &[&str]) -> Vec<BondNode> {
        ids.iter().map(|id| BondNode::new(*id, "adj", *id)).collect()
    }

    #[tokio::test]
    async fn test_duplicate_bond_fails_whole_batch() {
        let db = MemoryGraphStore::new();
        db.create_bonds(&bonds(&["b1"])).await.unwrap();

        let result = db.create_bonds(&bonds(&["b2", "b1"])).await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        assert_eq!(db.count(GraphEntity::Bonds).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_whole_batch() {
        let db = MemoryGraphStore::new();
        db.create_bonds(&bonds(&["b1", "b2"])).await.unwrap();

        let edges = vec![FollowsEdge::new("b1", "b2"), FollowsEdge::new("b2", "ghost")];
        let result = db.create_follows(&edges).await;
        assert!(matches!(result, Err(Error::ReferentialIntegrity(_))));
        assert_eq!(db.count(GraphEntity::Follows).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_follows_page_order() {
        let db = MemoryGraphStore::new();
        db.create_bonds(&bonds(&["a", "b", "c"])).await.unwrap();
        db.create_follows(&[FollowsEdge::new("c", "a"), FollowsEdge::new("a", "c"), FollowsEdge::new("a", "b")])
            .await
            .unwrap();

        let first = db.fetch_follows(0, 2).await.unwrap();
        let rest = db.fetch_follows(2, 2).await.unwrap();
        let order: Vec<_> = first.iter().chain(&rest).map(|e| (e.from_id.as_str(), e.to_id.as_str())).collect();
        assert_eq!(order, vec![("a", "b"), ("a", "c"), ("c", "a")]);
        assert!(db.fetch_follows(3, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_batch_drains() {
        let db = MemoryGraphStore::new();
        db.create_bonds(&bonds(&["a", "b", "c"])).await.unwrap();
        assert_eq!(db.delete_batch(GraphEntity::Bonds, 2).await.unwrap(), 2);
        assert_eq!(db.delete_batch(GraphEntity::Bonds, 2).await.unwrap(), 1);
        assert_eq!(db.delete_batch(GraphEntity::Bonds, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_authors_merge_once() {
        let db = MemoryGraphStore::new();
        let books = vec![
            BookNode::new("bk1", "Aion").by("Jung"),
            BookNode::new("bk2", "Answer to Job").by("Jung"),
            BookNode::new("bk3", "Anonymous"),
        ];
        db.merge_books(&books).await.unwrap();
        assert_eq!(db.merge_authors(&books).await.unwrap(), 2);
        db.merge_authors(&books).await.unwrap();
        assert_eq!(db.count(GraphEntity::Authors).await.unwrap(), 1);
        assert_eq!(db.count(GraphEntity::Wrote).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refused_connects() {
        let db = MemoryGraphStore::new();
        db.fail_next_connects(2);
        assert!(db.connect().await.is_err());
        assert!(db.connect().await.is_err());
        assert!(db.connect().await.is_ok());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> CapturedLog {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_contains_for_unknown_book_warns() {
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt().with_writer(log.clone()).with_ansi(false).finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let db = MemoryGraphStore::new();
        db.create_bonds(&bonds(&["b1", "b2"])).await.unwrap();
        let created = db.merge_contains("bk404", &["b1".to_string(), "b2".to_string()]).await.unwrap();

        assert_eq!(created, 0);
        assert!(db.contains_pairs().is_empty());
        let output = String::from_utf8(log.0.lock().clone()).unwrap();
        assert!(output.contains("book not found"), "{output}");
        assert!(output.contains("bk404"), "{output}");
    }
}
