//! Graph store contract.
//!
//! Every operation is one round trip and, for writes, one transaction.
//! A failed write leaves earlier batches committed.

pub mod memory;
#[cfg(feature = "bolt")]
pub mod bolt;

use async_trait::async_trait;

use crate::index::IndexSpec;
use crate::model::{BondNode, BookNode, BookSample, FollowsEdge};
use crate::Result;
use super::GraphEntity;

pub use memory::MemoryGraphStore;
#[cfg(feature = "bolt")]
pub use bolt::BoltGraphStore;

/// Operations the migration engine needs from a graph database.
///
/// Export reads use offset windows over a stable order: bonds and books by
/// `id`, follows by `(from_id, to_id)`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap round trip proving the handle is usable.
    async fn ping(&self) -> Result<()>;

    /// Create indexes and constraints that do not exist yet.
    async fn create_indexes(&self, specs: &[IndexSpec]) -> Result<()>;

    /// Delete up to `limit` elements of one kind. Returns how many went.
    async fn delete_batch(&self, entity: GraphEntity, limit: usize) -> Result<u64>;

    // ========================================================================
    // Export
    // ========================================================================

    async fn fetch_books(&self, skip: u64, limit: usize) -> Result<Vec<BookNode>>;

    async fn fetch_bonds(&self, skip: u64, limit: usize) -> Result<Vec<BondNode>>;

    async fn fetch_follows(&self, skip: u64, limit: usize) -> Result<Vec<FollowsEdge>>;

    // ========================================================================
    // Import
    // ========================================================================

    /// Bulk create. A bond id that already exists fails the whole batch.
    async fn create_bonds(&self, bonds: &[BondNode]) -> Result<u64>;

    /// Bulk create. A missing endpoint fails the whole batch with
    /// `Error::ReferentialIntegrity`; nothing in the batch is written.
    async fn create_follows(&self, edges: &[FollowsEdge]) -> Result<u64>;

    /// Merge books by id, overwriting their properties.
    async fn merge_books(&self, books: &[BookNode]) -> Result<u64>;

    /// Merge one author per distinct name and a WROTE edge to each book.
    /// Returns the number of WROTE edges present for the batch.
    async fn merge_authors(&self, books: &[BookNode]) -> Result<u64>;

    // ========================================================================
    // Containment
    // ========================================================================

    async fn book_ids(&self) -> Result<Vec<String>>;

    /// Distinct bond ids touching any follows edge tagged with `book_id`.
    async fn bonds_in_book(&self, book_id: &str) -> Result<Vec<String>>;

    /// Merge book→bond CONTAINS edges. Returns only the newly created ones.
    async fn merge_contains(&self, book_id: &str, bond_ids: &[String]) -> Result<u64>;

    // ========================================================================
    // Verification
    // ========================================================================

    async fn count(&self, entity: GraphEntity) -> Result<u64>;

    /// Books with the most contained bonds, largest first.
    async fn top_books(&self, limit: usize) -> Result<Vec<BookSample>>;
}
