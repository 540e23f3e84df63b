//! Audit record of one export or import run.
//!
//! Written next to the flat files as pretty JSON. An import reads the export
//! manifest left in the same directory to know which counts to expect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{GraphEntity, Table};
use crate::verify::{Expectations, StoreKind};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Export,
    Import,
}

impl Operation {
    pub fn file_name(self) -> &'static str {
        match self {
            Operation::Export => "manifest.json",
            Operation::Import => "manifest.import.json",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Export => f.write_str("export"),
            Operation::Import => f.write_str("import"),
        }
    }
}

/// Per-entity counts for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
    /// Rows written (export) or loaded (import) per graph entity.
    #[serde(default)]
    pub graph: BTreeMap<GraphEntity, u64>,
    /// Rows written or loaded per relational table.
    #[serde(default)]
    pub relational: BTreeMap<Table, u64>,
    /// Rows dropped per input file, import only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<String, u64>,
}

impl Manifest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            timestamp: Utc::now(),
            graph: BTreeMap::new(),
            relational: BTreeMap::new(),
            skipped: BTreeMap::new(),
        }
    }

    pub fn path_in(dir: &Path, operation: Operation) -> PathBuf {
        dir.join(operation.file_name())
    }

    /// Write to `<dir>/<operation file name>`, returning the path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir, self.operation);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        tracing::info!(
            path = %path.display(),
            operation = %self.operation,
            entities = self.graph.len() + self.relational.len(),
            "Manifest saved"
        );
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&json)?;
        tracing::info!(path = %path.display(), operation = %manifest.operation, "Manifest loaded");
        Ok(manifest)
    }

    /// The manifest for `operation` in `dir`, if one was written.
    pub fn find(dir: &Path, operation: Operation) -> Result<Option<Self>> {
        let path = Self::path_in(dir, operation);
        if !path.is_file() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    /// Every recorded count as an expected literal.
    pub fn expectations(&self) -> Expectations {
        let mut expect = Expectations::new();
        for (entity, n) in &self.graph {
            expect.insert(StoreKind::Graph, entity.name(), *n);
        }
        for (table, n) in &self.relational {
            expect.insert(StoreKind::Relational, table.name(), *n);
        }
        expect
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }
}
