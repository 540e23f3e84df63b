//! Relational store client: cursor-streamed export, batched upserts,
//! staged bulk copy for the vocabulary.

use std::collections::BTreeMap;
use std::path::Path;

use futures::stream::{BoxStream, TryChunksError, TryStreamExt};

use crate::codec::{read_coordinates, CsvRecord, RecordWriter};
use crate::config::MigrationConfig;
use crate::model::{BondNode, BondVocabEntry, LearnedBond, RelationalBond, WordCoordinate};
use crate::progress::ProgressTracker;
use crate::storage::{RelationalStore, Table};
use crate::Result;
use super::{next_chunk, open_dataset, Dataset, LoadStats};

/// Moves relational tables between a `RelationalStore` and flat files.
pub struct RelationalStoreClient<'a, R: RelationalStore + ?Sized> {
    store: &'a mut R,
    config: &'a MigrationConfig,
}

impl<'a, R: RelationalStore + ?Sized> RelationalStoreClient<'a, R> {
    pub fn new(store: &'a mut R, config: &'a MigrationConfig) -> Self {
        Self { store, config }
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Export word coordinates, vocabulary and learned bonds to `dir`.
    pub async fn export(&mut self, dir: &Path) -> Result<BTreeMap<Table, u64>> {
        let chunk = self.config.page_size;
        let interval = self.config.progress_interval;
        let mut written = BTreeMap::new();

        let rows = write_stream(self.store.stream_word_coordinates(), Dataset::WordCoordinates, dir, chunk, interval).await?;
        written.insert(Table::WordCoordinates, rows);

        let rows = write_stream(self.store.stream_bond_vocab(), Dataset::BondVocab, dir, chunk, interval).await?;
        written.insert(Table::BondVocab, rows);

        let rows = write_stream(self.store.stream_learned_bonds(), Dataset::LearnedBonds, dir, chunk, interval).await?;
        written.insert(Table::LearnedBonds, rows);

        Ok(written)
    }

    // ========================================================================
    // Schema / clear
    // ========================================================================

    pub async fn ensure_schema(&mut self) -> Result<()> {
        self.store.ensure_schema().await?;
        tracing::info!("Relational schema ensured");
        Ok(())
    }

    /// Truncate every table this tool loads.
    pub async fn clear(&mut self) -> Result<()> {
        for table in Table::ALL {
            self.store.truncate(table).await?;
            tracing::info!(table = %table, "Truncated");
        }
        Ok(())
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Word coordinates from CSV, falling back to the coordinates JSON.
    /// Existing words are overwritten.
    pub async fn load_word_coordinates(&mut self, dir: &Path) -> Result<Option<LoadStats>> {
        let force = self.config.force_tolerant;
        if let Some(mut reader) = open_dataset::<WordCoordinate>(Dataset::WordCoordinates, dir, force)? {
            let mut stats = LoadStats::default();
            loop {
                let chunk = next_chunk(&mut reader, self.config.batch_size)?;
                if chunk.is_empty() {
                    break;
                }
                let chunk = last_per_key(chunk, |c| c.word.clone());
                self.store.upsert_word_coordinates(&chunk).await?;
                stats.loaded += chunk.len() as u64;
            }
            stats.record_read(reader.stats());
            tracing::info!(table = "word_coordinates", rows = stats.loaded, skipped = stats.skipped, "Loaded");
            return Ok(Some(stats));
        }

        let Some(found) = Dataset::CoordinatesJson.locate(dir, force) else {
            return Ok(None);
        };
        tracing::info!(path = %found.path.display(), "Reading word coordinates from JSON");
        let decoded = read_coordinates(&found.path, "json")?;
        let mut stats = LoadStats { skipped: decoded.skipped, coerced: decoded.coerced, ..LoadStats::default() };
        let mut rows = last_per_key(decoded.coordinates, |c| c.word.clone()).into_iter().map(Ok);
        loop {
            let chunk = next_chunk(&mut rows, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            self.store.upsert_word_coordinates(&chunk).await?;
            stats.loaded += chunk.len() as u64;
        }
        if stats.skipped > 0 {
            tracing::warn!(count = stats.skipped, "Skipped coordinates with unrecognised shape");
        }
        tracing::info!(table = "word_coordinates", rows = stats.loaded, "Loaded");
        Ok(Some(stats))
    }

    /// Seed the `bonds` table from the graph bond export.
    pub async fn load_bonds(&mut self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<BondNode>(Dataset::Bonds, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        loop {
            let chunk = next_chunk(&mut reader, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let rows: Vec<RelationalBond> = chunk.iter().map(RelationalBond::from).collect();
            let rows = last_per_key(rows, RelationalBond::key);
            self.store.upsert_bonds(&rows).await?;
            stats.loaded += rows.len() as u64;
        }
        stats.record_read(reader.stats());
        tracing::info!(table = "bonds", rows = stats.loaded, "Loaded");
        Ok(Some(stats))
    }

    /// Bulk-copy vocabulary entries; `total_count` accumulates on existing keys.
    pub async fn load_bond_vocab(&mut self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<BondVocabEntry>(Dataset::BondVocab, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        let progress = ProgressTracker::new("hyp_bond_vocab", self.config.progress_interval);
        loop {
            let chunk = next_chunk(&mut reader, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            let read = chunk.len() as u64;
            let merged = merge_vocab(chunk);
            self.store.copy_bond_vocab(&merged).await?;
            stats.loaded += read;
            progress.advance(read);
        }
        stats.record_read(reader.stats());
        let timing = progress.finish();
        tracing::info!(
            table = "hyp_bond_vocab",
            rows = stats.loaded,
            coerced = stats.coerced,
            rate = %timing.rate_label(),
            "Loaded"
        );
        Ok(Some(stats))
    }

    /// Insert learned bonds; pairs already present are left untouched.
    pub async fn load_learned_bonds(&mut self, dir: &Path) -> Result<Option<LoadStats>> {
        let Some(mut reader) = open_dataset::<LearnedBond>(Dataset::LearnedBonds, dir, self.config.force_tolerant)? else {
            return Ok(None);
        };
        let mut stats = LoadStats::default();
        let mut inserted = 0;
        loop {
            let chunk = next_chunk(&mut reader, self.config.batch_size)?;
            if chunk.is_empty() {
                break;
            }
            inserted += self.store.insert_learned_bonds(&chunk).await?;
            stats.loaded += chunk.len() as u64;
        }
        stats.record_read(reader.stats());
        tracing::info!(
            table = "learned_bonds",
            rows = stats.loaded,
            inserted,
            ignored = stats.loaded - inserted.min(stats.loaded),
            "Loaded"
        );
        Ok(Some(stats))
    }
}

/// Drain a row stream into a dataset file, chunk by chunk.
async fn write_stream<T: CsvRecord>(
    stream: BoxStream<'_, Result<T>>,
    dataset: Dataset,
    dir: &Path,
    chunk_size: usize,
    interval: std::time::Duration,
) -> Result<u64> {
    let path = dataset.path_in(dir);
    let mut writer = RecordWriter::<T>::create(&path)?;
    let progress = ProgressTracker::new(dataset.file_name(), interval);

    let mut chunks = stream.try_chunks(chunk_size);
    while let Some(chunk) = chunks.try_next().await.map_err(|TryChunksError(_, e)| e)? {
        writer.write_all(&chunk)?;
        progress.advance(chunk.len() as u64);
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

/// Keep the last row for each key. Statements that update on conflict
/// cannot touch the same key twice.
fn last_per_key<T, K: Ord>(rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut by_key = BTreeMap::new();
    for row in rows {
        by_key.insert(key(&row), row);
    }
    by_key.into_values().collect()
}

/// Fold repeated vocabulary keys within one batch, accumulating counts.
fn merge_vocab(rows: Vec<BondVocabEntry>) -> Vec<BondVocabEntry> {
    let mut by_key: BTreeMap<String, BondVocabEntry> = BTreeMap::new();
    for row in rows {
        match by_key.get_mut(&row.bond) {
            Some(existing) => existing.absorb(row),
            None => {
                by_key.insert(row.bond.clone(), row);
            }
        }
    }
    by_key.into_values().collect()
}
