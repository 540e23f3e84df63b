//! Bond nodes and the directed FOLLOWS adjacency between them.

use serde::{Deserialize, Serialize};

use super::{AXIS_RANGE, DEFAULT_AXIS, DEFAULT_SOURCE, DEFAULT_TAU, DEFAULT_WEIGHT, TAU_RANGE};

/// An adjective–noun semantic unit with coordinates in (A, S, tau) space.
///
/// Unique by `id`. When a legacy row carries no id, the id is the bond key
/// `adj_noun`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondNode {
    pub id: String,
    pub adj: String,
    pub noun: String,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    pub tau: f64,
    pub source: String,
}

impl BondNode {
    pub fn new(id: impl Into<String>, adj: impl Into<String>, noun: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            adj: adj.into(),
            noun: noun.into(),
            a: DEFAULT_AXIS,
            s: DEFAULT_AXIS,
            tau: DEFAULT_TAU,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_coords(mut self, a: f64, s: f64, tau: f64) -> Self {
        self.a = a;
        self.s = s;
        self.tau = tau;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// The vocabulary key for this bond (`adj_noun`).
    pub fn bond_key(&self) -> String {
        bond_key(&self.adj, &self.noun)
    }

    /// True when all three coordinates sit inside their documented ranges.
    pub fn coords_in_range(&self) -> bool {
        AXIS_RANGE.contains(&self.a) && AXIS_RANGE.contains(&self.s) && TAU_RANGE.contains(&self.tau)
    }
}

/// Build the `adj_noun` key used by the vocabulary table.
pub fn bond_key(adj: &str, noun: &str) -> String {
    format!("{adj}_{noun}")
}

/// A directed, corpus-derived adjacency between two bonds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowsEdge {
    pub from_id: String,
    pub to_id: String,
    pub weight: f64,
    pub source: String,
    /// Book the adjacency was observed in. Drives containment derivation.
    pub book_id: Option<String>,
}

impl FollowsEdge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            weight: DEFAULT_WEIGHT,
            source: DEFAULT_SOURCE.to_string(),
            book_id: None,
        }
    }

    pub fn in_book(mut self, book_id: impl Into<String>) -> Self {
        self.book_id = Some(book_id.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Self-loops are never written to the graph.
    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }

    /// Both endpoints, source first.
    pub fn endpoints(&self) -> [&str; 2] {
        [self.from_id.as_str(), self.to_id.as_str()]
    }
}
