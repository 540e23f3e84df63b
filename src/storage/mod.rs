//! # Storage Contracts
//!
//! The two contracts between the migration engine and a concrete store.
//! Clients, the deriver and the verifier only ever see these traits.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryGraphStore` | `graph::memory` | In-memory graph for tests and dry runs |
//! | `BoltGraphStore` | `graph::bolt` | External Neo4j via Bolt protocol |
//! | `MemoryRelationalStore` | `relational::memory` | In-memory tables |
//! | `PgRelationalStore` | `relational::postgres` | External PostgreSQL |

pub mod graph;
pub mod relational;

use serde::{Deserialize, Serialize};

pub use graph::{GraphStore, MemoryGraphStore};
pub use relational::{MemoryRelationalStore, RelationalStore};

#[cfg(feature = "bolt")]
pub use graph::BoltGraphStore;
#[cfg(feature = "postgres")]
pub use relational::PgRelationalStore;

// ============================================================================
// Graph entities
// ============================================================================

/// Countable, clearable kinds of graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphEntity {
    Books,
    Authors,
    Bonds,
    Follows,
    Contains,
    Wrote,
}

impl GraphEntity {
    pub const ALL: [GraphEntity; 6] = [
        GraphEntity::Books,
        GraphEntity::Authors,
        GraphEntity::Bonds,
        GraphEntity::Follows,
        GraphEntity::Contains,
        GraphEntity::Wrote,
    ];

    /// Relationships before nodes, so no node delete ever hits a live edge.
    pub const CLEAR_ORDER: [GraphEntity; 6] = [
        GraphEntity::Contains,
        GraphEntity::Wrote,
        GraphEntity::Follows,
        GraphEntity::Bonds,
        GraphEntity::Books,
        GraphEntity::Authors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GraphEntity::Books => "books",
            GraphEntity::Authors => "authors",
            GraphEntity::Bonds => "bonds",
            GraphEntity::Follows => "follows",
            GraphEntity::Contains => "contains",
            GraphEntity::Wrote => "wrote",
        }
    }

    pub fn is_relationship(self) -> bool {
        matches!(self, GraphEntity::Follows | GraphEntity::Contains | GraphEntity::Wrote)
    }

    /// Neo4j label or relationship type.
    pub fn graph_name(self) -> &'static str {
        match self {
            GraphEntity::Books => "Book",
            GraphEntity::Authors => "Author",
            GraphEntity::Bonds => "Bond",
            GraphEntity::Follows => "FOLLOWS",
            GraphEntity::Contains => "CONTAINS",
            GraphEntity::Wrote => "WROTE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

impl std::fmt::Display for GraphEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Relational tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    WordCoordinates,
    Bonds,
    #[serde(rename = "hyp_bond_vocab")]
    BondVocab,
    LearnedBonds,
}

impl Table {
    pub const ALL: [Table; 4] =
        [Table::WordCoordinates, Table::Bonds, Table::BondVocab, Table::LearnedBonds];

    /// SQL table name.
    pub fn name(self) -> &'static str {
        match self {
            Table::WordCoordinates => "word_coordinates",
            Table::Bonds => "bonds",
            Table::BondVocab => "hyp_bond_vocab",
            Table::LearnedBonds => "learned_bonds",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_order_relationships_first() {
        let first_node = GraphEntity::CLEAR_ORDER.iter().position(|e| !e.is_relationship()).unwrap();
        assert!(GraphEntity::CLEAR_ORDER[first_node..].iter().all(|e| !e.is_relationship()));
        assert_eq!(GraphEntity::CLEAR_ORDER.len(), GraphEntity::ALL.len());
    }

    #[test]
    fn test_names_round_trip() {
        for entity in GraphEntity::ALL {
            assert_eq!(GraphEntity::from_name(entity.name()), Some(entity));
        }
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
    }
}
