//! Run configuration.
//!
//! Plain values; the binary fills them from flags and environment. Nothing
//! here reads the environment itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::progress::DEFAULT_REPORT_INTERVAL;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 5_000;
pub const DEFAULT_PAGE_SIZE: usize = 10_000;
pub const DEFAULT_CLEAR_BATCH: usize = 10_000;
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

// ============================================================================
// Store endpoints
// ============================================================================

/// Neo4j connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: String::new(),
            database: None,
        }
    }
}

impl GraphConfig {
    /// Printable endpoint; never includes the password.
    pub fn endpoint(&self) -> String {
        match &self.database {
            Some(db) => format!("{} (user {}, database {db})", self.uri, self.user),
            None => format!("{} (user {})", self.uri, self.user),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            database: "semantic".into(),
            user: "postgres".into(),
            password: String::new(),
        }
    }
}

impl RelationalConfig {
    /// `host:port/db`; never includes the password.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

// ============================================================================
// MigrationConfig
// ============================================================================

/// Knobs shared by every component of one run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding the flat-file intermediates and manifests.
    pub data_dir: PathBuf,
    /// Rows per import write.
    pub batch_size: usize,
    /// Rows per export page.
    pub page_size: usize,
    /// Elements per clear transaction.
    pub clear_batch: usize,
    /// Decode every input as a historical file, whatever its name.
    pub force_tolerant: bool,
    /// Run the clear step before loading.
    pub clear: bool,
    /// Entries per sample check.
    pub sample_size: usize,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
}

impl MigrationConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            clear_batch: DEFAULT_CLEAR_BATCH,
            force_tolerant: false,
            clear: true,
            sample_size: DEFAULT_SAMPLE_SIZE,
            retry: RetryPolicy::default(),
            progress_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tolerant(mut self, force: bool) -> Self {
        self.force_tolerant = force;
        self
    }

    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.page_size == 0 || self.clear_batch == 0 {
            return Err(Error::Config("batch, page and clear sizes must be positive".into()));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_hide_password() {
        let graph = GraphConfig { password: "hunter2".into(), ..GraphConfig::default() };
        assert!(!graph.endpoint().contains("hunter2"));
        let relational = RelationalConfig { password: "hunter2".into(), ..RelationalConfig::default() };
        assert_eq!(relational.endpoint(), "localhost:5432/semantic");
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::new("data/migration");
        assert_eq!(config.batch_size, 5_000);
        assert_eq!(config.page_size, 10_000);
        assert!(config.clear);
        assert!(config.validate().is_ok());
        assert!(config.with_batch_size(0).validate().is_err());
    }
}
