//! Relational rows: word coordinates, bond vocabulary, learned bonds.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BondNode, DEFAULT_AXIS, DEFAULT_TAU};

/// Per-word coordinates. The word is always stored lower-cased.
///
/// Conflict policy: overwritten wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCoordinate {
    pub word: String,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    pub tau: f64,
    pub source: String,
    pub created_at: Option<NaiveDateTime>,
}

impl WordCoordinate {
    pub fn new(word: &str, a: f64, s: f64, tau: f64, source: impl Into<String>) -> Self {
        Self {
            word: word.trim().to_lowercase(),
            a,
            s,
            tau,
            source: source.into(),
            created_at: None,
        }
    }
}

/// Aggregate corpus frequency for one `adj_noun` bond.
///
/// Conflict policy: `total_count` accumulates, everything else is last-written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondVocabEntry {
    pub bond: String,
    pub first_seen_order: Option<i32>,
    pub first_seen_book: Option<Uuid>,
    pub total_count: i32,
    pub book_count: i32,
    pub created_at: Option<NaiveDateTime>,
}

impl BondVocabEntry {
    pub fn new(bond: impl Into<String>, total_count: i32) -> Self {
        Self {
            bond: bond.into(),
            first_seen_order: None,
            first_seen_book: None,
            total_count,
            book_count: 1,
            created_at: None,
        }
    }

    /// Fold another observation of the same key into this one.
    pub fn absorb(&mut self, later: BondVocabEntry) {
        self.total_count = self.total_count.saturating_add(later.total_count);
        self.first_seen_order = later.first_seen_order;
        self.first_seen_book = later.first_seen_book;
        self.book_count = later.book_count;
        if later.created_at.is_some() {
            self.created_at = later.created_at;
        }
    }
}

/// A bond learned at runtime. Unique by `(adj, noun)`; the first write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedBond {
    pub adj: String,
    pub noun: String,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    pub tau: f64,
    pub source: String,
    pub confidence: f64,
    pub use_count: i32,
}

impl LearnedBond {
    pub fn new(adj: impl Into<String>, noun: impl Into<String>) -> Self {
        Self {
            adj: adj.into(),
            noun: noun.into(),
            a: DEFAULT_AXIS,
            s: DEFAULT_AXIS,
            tau: DEFAULT_TAU,
            source: "user".to_string(),
            confidence: 1.0,
            use_count: 1,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.adj.clone(), self.noun.clone())
    }
}

/// Row of the relational `bonds` table, seeded from graph bond exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalBond {
    pub adj: String,
    pub noun: String,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    pub tau: f64,
    pub variety: Option<String>,
}

impl RelationalBond {
    pub fn key(&self) -> (String, String) {
        (self.adj.clone(), self.noun.clone())
    }
}

impl From<&BondNode> for RelationalBond {
    fn from(bond: &BondNode) -> Self {
        Self {
            adj: bond.adj.to_lowercase(),
            noun: bond.noun.to_lowercase(),
            a: bond.a,
            s: bond.s,
            tau: bond.tau,
            variety: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_is_normalized() {
        let coord = WordCoordinate::new("  Shadow ", 0.1, 0.2, 2.0, "json");
        assert_eq!(coord.word, "shadow");
    }

    #[test]
    fn test_vocab_absorb_accumulates_total_only() {
        let mut entry = BondVocabEntry::new("dark_forest", 3);
        let mut later = BondVocabEntry::new("dark_forest", 4);
        later.book_count = 2;
        later.first_seen_order = Some(9);
        entry.absorb(later);
        assert_eq!(entry.total_count, 7);
        assert_eq!(entry.book_count, 2);
        assert_eq!(entry.first_seen_order, Some(9));
    }

    #[test]
    fn test_relational_bond_lowercases() {
        let bond = BondNode::new("b1", "Dark", "Forest").with_coords(0.3, -0.1, 3.0);
        let row = RelationalBond::from(&bond);
        assert_eq!(row.adj, "dark");
        assert_eq!(row.noun, "forest");
        assert_eq!(row.tau, 3.0);
    }
}
