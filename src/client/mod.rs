//! # Store Clients
//!
//! Stream data out of a store into flat files, and batch flat files back
//! into a store. Clients borrow a connected store handle for the length of
//! one run; they never open connections themselves.

pub mod dataset;
pub mod graph;
pub mod relational;

use std::ops::AddAssign;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{CsvRecord, ReadStats, RecordReader};
use crate::Result;

pub use dataset::{Dataset, Located};
pub use graph::GraphStoreClient;
pub use relational::RelationalStoreClient;

/// Counters for one dataset load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Records handed to the store.
    pub loaded: u64,
    /// Rows dropped before reaching the store (malformed, unrecognised shape).
    pub skipped: u64,
    /// Follows edges dropped because both ends were the same bond.
    pub self_loops: u64,
    /// Fields that fell back to their default.
    pub coerced: u64,
    /// Bonds loaded with A, S or tau outside the documented ranges.
    pub out_of_range: u64,
}

impl LoadStats {
    pub(crate) fn record_read(&mut self, read: ReadStats) {
        self.skipped += read.skipped;
        self.coerced += read.coerced;
    }

    /// Records present in the file that did not make it into the store.
    pub fn dropped(&self) -> u64 {
        self.skipped + self.self_loops
    }
}

impl AddAssign for LoadStats {
    fn add_assign(&mut self, other: LoadStats) {
        self.loaded += other.loaded;
        self.skipped += other.skipped;
        self.self_loops += other.self_loops;
        self.coerced += other.coerced;
        self.out_of_range += other.out_of_range;
    }
}

/// Open a dataset for reading, or `None` (with a warning) if no file exists.
pub(crate) fn open_dataset<T: CsvRecord>(
    dataset: Dataset,
    dir: &Path,
    force_tolerant: bool,
) -> Result<Option<RecordReader<T>>> {
    match dataset.locate(dir, force_tolerant) {
        Some(found) => {
            tracing::info!(path = %found.path.display(), mode = %found.mode, "Reading {dataset}");
            Ok(Some(RecordReader::open(&found.path, found.mode)?))
        }
        None => {
            tracing::warn!(dataset = %dataset, dir = %dir.display(), "Input file not found, skipping dataset");
            Ok(None)
        }
    }
}

/// Pull up to `size` records. An empty chunk means the input is exhausted.
pub(crate) fn next_chunk<T, I>(records: &mut I, size: usize) -> Result<Vec<T>>
where
    I: Iterator<Item = Result<T>>,
{
    let mut chunk = Vec::with_capacity(size);
    for record in records.by_ref().take(size) {
        chunk.push(record?);
    }
    Ok(chunk)
}
