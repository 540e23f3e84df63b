//! # Corpus Data Model
//!
//! Typed records for every entity that crosses a store boundary.
//! Graph-side entities (bonds, follows, books, authors, contains) and
//! relational rows (word coordinates, bond vocabulary, learned bonds)
//! share one vocabulary so the codec can do all coercion in one place.
//!
//! Design rule: NO driver types here (no Bolt values, no SQL rows).
//! Pure data; nothing here performs I/O.

pub mod bond;
pub mod book;
pub mod table;

pub use bond::{bond_key, BondNode, FollowsEdge};
pub use book::{AuthorNode, BookNode, BookSample, ContainsEdge};
pub use table::{BondVocabEntry, LearnedBond, RelationalBond, WordCoordinate};

/// Default abstraction level when a coordinate is unknown.
pub const DEFAULT_TAU: f64 = 2.5;

/// Default affect/salience when a coordinate is unknown.
pub const DEFAULT_AXIS: f64 = 0.0;

/// Default follows-edge weight (legacy producers emit `NULL`).
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Source tag for corpus-derived bonds and edges.
pub const DEFAULT_SOURCE: &str = "corpus";

/// Valid range of the A and S axes.
pub const AXIS_RANGE: std::ops::RangeInclusive<f64> = -1.0..=1.0;

/// Valid range of tau.
pub const TAU_RANGE: std::ops::RangeInclusive<f64> = 0.5..=4.5;
