//! Book → bond containment derivation.
//!
//! A book contains every bond that appears as either endpoint of a FOLLOWS
//! edge tagged with that book's id. Edges are merged, so a re-run after a
//! partial failure only fills in what is missing.

use serde::{Deserialize, Serialize};

use crate::storage::GraphStore;
use crate::Result;

/// Counters for one derivation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveStats {
    /// Books visited.
    pub books: u64,
    /// Distinct (book, bond) pairs found.
    pub pairs: u64,
    /// CONTAINS edges that did not exist before this pass.
    pub created: u64,
}

pub struct RelationshipDeriver<'a, G: GraphStore + ?Sized> {
    store: &'a G,
    batch_size: usize,
}

impl<'a, G: GraphStore + ?Sized> RelationshipDeriver<'a, G> {
    pub fn new(store: &'a G, batch_size: usize) -> Self {
        Self { store, batch_size: batch_size.max(1) }
    }

    /// Derive CONTAINS edges for every book in the store.
    pub async fn derive(&self) -> Result<DeriveStats> {
        let mut stats = DeriveStats::default();

        for book_id in self.store.book_ids().await? {
            let bonds = self.store.bonds_in_book(&book_id).await?;
            stats.books += 1;
            stats.pairs += bonds.len() as u64;

            for chunk in bonds.chunks(self.batch_size) {
                stats.created += self.store.merge_contains(&book_id, chunk).await?;
            }
            tracing::debug!(book = %book_id, bonds = bonds.len(), "Derived containment");
        }

        tracing::info!(books = stats.books, pairs = stats.pairs, created = stats.created, "Derived CONTAINS edges");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BondNode, BookNode, FollowsEdge};
    use crate::storage::MemoryGraphStore;
    use pretty_assertions::assert_eq;

    async fn seeded() -> MemoryGraphStore {
        let store = MemoryGraphStore::new();
        store
            .create_bonds(&[
                BondNode::new("b1", "dark", "forest"),
                BondNode::new("b2", "old", "tree"),
                BondNode::new("b3", "cold", "river"),
            ])
            .await
            .unwrap();
        store.merge_books(&[BookNode::new("bk1", "Grimm"), BookNode::new("bk2", "Empty")]).await.unwrap();
        store
            .create_follows(&[
                FollowsEdge::new("b1", "b2").in_book("bk1"),
                FollowsEdge::new("b2", "b1").in_book("bk1"),
                FollowsEdge::new("b2", "b3").in_book("elsewhere"),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_contains_from_tagged_follows() {
        let store = seeded().await;
        let stats = RelationshipDeriver::new(&store, 100).derive().await.unwrap();

        assert_eq!(stats, DeriveStats { books: 2, pairs: 2, created: 2 });
        assert_eq!(
            store.contains_pairs(),
            vec![("bk1".to_string(), "b1".to_string()), ("bk1".to_string(), "b2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_rerun_creates_nothing() {
        let store = seeded().await;
        let deriver = RelationshipDeriver::new(&store, 1);
        deriver.derive().await.unwrap();
        let again = deriver.derive().await.unwrap();

        assert_eq!(again.created, 0);
        assert_eq!(again.pairs, 2);
        assert_eq!(store.contains_pairs().len(), 2);
    }
}
