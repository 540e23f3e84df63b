//! # corpus-migrate — Cross-Store Corpus Migration
//!
//! Moves the bond corpus graph (bonds, FOLLOWS edges, books, authors) and
//! its relational analytics layer (word coordinates, bond vocabulary,
//! learned bonds) between a graph store and a relational store, through
//! portable CSV/JSON intermediates.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `GraphStore` and `RelationalStore` are the contracts
//!    between the migration engine and any backend
//! 2. **Typed records**: `BondNode`, `FollowsEdge`, `WordCoordinate`, ... cross
//!    every boundary; the codec is the only place that coerces types
//! 3. **Explicit handles**: store handles are connected once per run and passed
//!    into each component; nothing is process-global
//! 4. **Bounded memory**: exports page, imports batch; no dataset is ever
//!    held whole
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corpus_migrate::{MemoryGraphStore, MemoryRelationalStore, MigrationConfig, MigrationOrchestrator};
//!
//! # async fn example() -> corpus_migrate::Result<()> {
//! let graph = MemoryGraphStore::new();
//! let relational = MemoryRelationalStore::new();
//!
//! let orchestrator = MigrationOrchestrator::new(MigrationConfig::new("data/migration"));
//! let report = orchestrator.export(&graph, &relational, false).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | `MemoryGraphStore` | (default) | In-memory graph for tests and dry runs |
//! | `MemoryRelationalStore` | (default) | In-memory tables for tests and dry runs |
//! | `BoltGraphStore` | `bolt` | External Neo4j via Bolt |
//! | `PgRelationalStore` | `postgres` | External PostgreSQL |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod codec;
pub mod storage;
pub mod index;
pub mod client;
pub mod derive;
pub mod verify;
pub mod manifest;
pub mod orchestrator;
pub mod retry;
pub mod config;
pub mod progress;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    AuthorNode, BondNode, BondVocabEntry, BookNode, ContainsEdge, FollowsEdge,
    LearnedBond, RelationalBond, WordCoordinate,
};

// ============================================================================
// Re-exports: Codec
// ============================================================================

pub use codec::{CsvRecord, DecodeMode, ReadStats, RecordReader, RecordWriter};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    GraphEntity, GraphStore, MemoryGraphStore, MemoryRelationalStore,
    RelationalStore, Table,
};
#[cfg(feature = "bolt")]
pub use storage::BoltGraphStore;
#[cfg(feature = "postgres")]
pub use storage::PgRelationalStore;

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use client::{Dataset, GraphStoreClient, LoadStats, RelationalStoreClient};
pub use config::{GraphConfig, MigrationConfig, RelationalConfig};
pub use derive::{DeriveStats, RelationshipDeriver};
pub use manifest::{Manifest, Operation};
pub use orchestrator::{MigrationOrchestrator, Phase, RunKind, RunReport};
pub use retry::{connect_with_retry, Backoff, Clock, Connector, FakeClock, RetryPolicy, TokioClock};
pub use verify::{Check, ConsistencyVerifier, Expectations, StoreKind, VerificationReport};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Could not connect to {endpoint} after {attempts} attempt(s): {message}")]
    Connection { endpoint: String, attempts: u32, message: String },

    #[error("Graph store error: {0}")]
    Graph(String),

    #[error("Relational store error: {0}")]
    Relational(String),

    #[error("Malformed row at line {line}: {message}")]
    Decode { line: u64, message: String },

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(std::path::PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidPhase { from: orchestrator::Phase, to: orchestrator::Phase },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Connection failures abort a run before any mutation.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
