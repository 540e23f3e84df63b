//! Graph store client: paginated export, batched import, clear, indexes.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use crate::codec::{CsvRecord, RecordWriter};
use crate::config::MigrationConfig;
use crate::index::corpus_indexes;
use crate::model::{BondNode, BookNode, FollowsEdge};
use crate::progress::ProgressTracker;
use crate::storage::{GraphEntity, GraphStore};
use crate::Result;
use super::{next_chunk, open_dataset, Dataset, LoadStats};

/// Moves graph entities between a `GraphStore` and flat files.
pub struct GraphStoreClient<'a, G: GraphStore + ?Sized> {
    store: &'a G,
    config: &'a MigrationConfig,
}

impl<'a, G: GraphStore + ?Sized> GraphStoreClient<'a, G> {
    pub fn new(store: &'a G, config: &'a MigrationConfig) -> Self {
        Self { store, config }
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Export books, bonds and follows to `dir`. Returns rows written per entity.
    pub async fn export(&self, dir: &Path) -> Result<BTreeMap<GraphEntity, u64>> {
        let mut written = BTreeMap::new();
        written.insert(GraphEntity::Books, self.export_books(dir).await?);
        written.insert(GraphEntity::Bonds, self.export_bonds(dir).await?);
        written.insert(GraphEntity::Follows, self.export_follows(dir).await?);
        Ok(written)
    }

    pub async fn export_books(&self, dir: &Path) -> Result<u64> {
        self.export_paged(Dataset::Books, dir, |skip, limit| self.store.fetch_books(skip, limit)).await
    }

    pub async fn export_bonds(&self, dir: &Path) -> Result<u64> {
        self.export_paged(Dataset::Bonds, dir, |skip, limit| self.store.fetch_bonds(skip, limit)).await
    }

    pub async fn export_follows(&self, dir: &Path) -> Result<u64> {
        self.export_paged(Dataset::Follows, dir, |skip, limit| self.store.fetch_follows(skip, limit))
            .await
    }

    /// Fetch pages until one comes back empty, appending each to the file.
    async fn export_paged<T, F, Fut>(&self, dataset: Dataset, dir: &Path, fetch: F) -> Result<u64>
    where
        T: CsvRecord,
        F: Fn(u64, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let path = dataset.path_in(dir);
        let mut writer = RecordWriter::<T>::create(&path)?;
        let progress = ProgressTracker::new(dataset.file_name(), self.config.progress_interval);

        let mut skip = 0u64;
        loop {
            let page = fetch(skip, self.config.page_size).await?;
            if page.is_empty() {
                break;
            }
            writer.write_all(&page)?;
            skip += page.len() as u64;
            progress.advance(page.len() as u64);
        }

        let rows = writer.finish()?;
        let timing = progress.finish();
        tracing::info!(
            dataset = %dataset,
            rows,
            rate = %timing.rate_label(),
            elapsed_ms = timing.elapsed_ms(),
            path = %path.display(),
            "Exported"
        );
        Ok(rows)
    }

    // ========================================================================
    // Clear / indexes
    // ========================================================================

    /// Delete everything, relationships first, in bounded batches.
    pub async fn clear(&self) -> Result<BTreeMap<GraphEntity, u64>> {
        let mut deleted = BTreeMap::new();
        for entity in GraphEntity::CLEAR_ORDER {
            let mut total = 0;
            loop {
                let n = self.store.delete_batch(entity, self.config.clear_batch).await?;
                if n == 0 {
                    break;
                }
                total += n;
                tracing::debug!(entity = %entity, batch = n, total, "Deleted batch");
            }
            if total > 0 {
                tracing::info!(entity = %entity, rows = total, "Cleared");
            }
            deleted.insert(entity, total);
        }
        Ok(deleted)
    }

    pub async fn create_indexes(&self) -> Result<usize> {
        let specs = corpus_indexes();
        self.store.create_indexes(&specs).await?;
        tracing::info!(count = specs.len(), "Graph indexes ensured");
        Ok(specs.len())
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Merge books, then their authors and WROTE edges, batch by batch.
    pub async fn load_books(&self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<BookNode>(Dataset::Books, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        let mut linked = 0;

        loop {
            let chunk = next_chunk(&mut reader, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            stats.loaded += self.store.merge_books(&chunk).await?;
            linked += self.store.merge_authors(&chunk).await?;
        }

        stats.record_read(reader.stats());
        tracing::info!(rows = stats.loaded, authored = linked, skipped = stats.skipped, "Loaded books");
        Ok(Some(stats))
    }

    /// Bulk-create bonds. Assumes a cleared store.
    pub async fn load_bonds(&self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<BondNode>(Dataset::Bonds, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        let progress = ProgressTracker::new("bonds", self.config.progress_interval);

        loop {
            let chunk = next_chunk(&mut reader, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            stats.out_of_range += chunk.iter().filter(|bond| !bond.coords_in_range()).count() as u64;
            stats.loaded += self.store.create_bonds(&chunk).await?;
            progress.advance(chunk.len() as u64);
        }

        stats.record_read(reader.stats());
        let timing = progress.finish();
        if stats.out_of_range > 0 {
            tracing::warn!(count = stats.out_of_range, "Bonds with coordinates outside the documented ranges");
        }
        tracing::info!(
            rows = stats.loaded,
            skipped = stats.skipped,
            coerced = stats.coerced,
            rate = %timing.rate_label(),
            "Loaded bonds"
        );
        Ok(Some(stats))
    }

    /// Bulk-create follows edges. Self-loops are dropped before batching;
    /// a batch with a dangling endpoint fails the step.
    pub async fn load_follows(&self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<FollowsEdge>(Dataset::Follows, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        let mut self_loops = 0;
        let progress = ProgressTracker::new("follows", self.config.progress_interval);

        {
            let mut edges = reader.by_ref().filter(|record| {
                let is_loop = matches!(record, Ok(edge) if edge.is_self_loop());
                if is_loop {
                    self_loops += 1;
                }
                !is_loop
            });
            loop {
                let chunk = next_chunk(&mut edges, self.config.batch_size)?;
                if chunk.is_empty() {
                    break;
                }
                stats.loaded += self.store.create_follows(&chunk).await?;
                progress.advance(chunk.len() as u64);
            }
        }

        stats.self_loops = self_loops;
        stats.record_read(reader.stats());
        let timing = progress.finish();
        if stats.self_loops > 0 {
            tracing::warn!(count = stats.self_loops, "Skipped self-loop FOLLOWS edges");
        }
        tracing::info!(rows = stats.loaded, skipped = stats.skipped, rate = %timing.rate_label(), "Loaded follows");
        Ok(Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraphStore;
    use crate::Error;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_self_loops_are_counted_not_created() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bonds.csv", "id,adj,noun,A,S,tau,source\nb1,dark,forest,0,0,2.5,corpus\nb2,old,tree,0,0,2.5,corpus\n");
        write(dir.path(), "follows.csv", "from_id,to_id,source,book_id\nb1,b1,corpus,bk1\nb1,b2,corpus,bk1\nb2,b2,corpus,bk1\n");

        let store = MemoryGraphStore::new();
        let config = MigrationConfig::new(dir.path());
        let client = GraphStoreClient::new(&store, &config);
        client.load_bonds(dir.path()).await.unwrap();
        let stats = client.load_follows(dir.path()).await.unwrap().unwrap();

        assert_eq!(stats.self_loops, 2);
        assert_eq!(stats.loaded, 1);
        assert_eq!(store.count(GraphEntity::Follows).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dangling_endpoint_stops_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bonds.csv", "id,adj,noun,A,S,tau,source\nb1,dark,forest,0,0,2.5,corpus\n");
        write(dir.path(), "follows.csv", "from_id,to_id,source,book_id\nb1,ghost,corpus,\n");

        let store = MemoryGraphStore::new();
        let config = MigrationConfig::new(dir.path());
        let client = GraphStoreClient::new(&store, &config);
        client.load_bonds(dir.path()).await.unwrap();
        let err = client.load_follows(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::ReferentialIntegrity(_)));
    }

    #[tokio::test]
    async fn test_missing_file_skips_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryGraphStore::new();
        let config = MigrationConfig::new(dir.path());
        let client = GraphStoreClient::new(&store, &config);
        assert_eq!(client.load_books(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_export_pages_until_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryGraphStore::new();
        let bonds: Vec<BondNode> = (0..7).map(|i| BondNode::new(format!("b{i}"), "adj", format!("n{i}"))).collect();
        store.create_bonds(&bonds).await.unwrap();

        let config = MigrationConfig::new(dir.path()).with_page_size(3);
        let client = GraphStoreClient::new(&store, &config);
        assert_eq!(client.export_bonds(dir.path()).await.unwrap(), 7);

        let text = std::fs::read_to_string(dir.path().join("bonds.csv")).unwrap();
        assert_eq!(text.lines().count(), 8);
        assert!(text.starts_with("id,adj,noun,A,S,tau,source\n"));
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let store = MemoryGraphStore::new();
        let bonds: Vec<BondNode> = (0..25).map(|i| BondNode::new(format!("b{i}"), "adj", "noun")).collect();
        store.create_bonds(&bonds).await.unwrap();
        store.create_follows(&[FollowsEdge::new("b0", "b1")]).await.unwrap();

        let mut config = MigrationConfig::new("unused");
        config.clear_batch = 10;
        let deleted = GraphStoreClient::new(&store, &config).clear().await.unwrap();
        assert_eq!(deleted[&GraphEntity::Bonds], 25);
        assert_eq!(deleted[&GraphEntity::Follows], 1);
        for entity in GraphEntity::ALL {
            assert_eq!(store.count(entity).await.unwrap(), 0);
        }
    }
}
