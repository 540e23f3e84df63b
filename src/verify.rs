//! # Consistency Verification
//!
//! Read-only counts against both stores, compared to optional expected
//! literals. Every check runs; a mismatch or a failing count query is
//! recorded on its own line and never stops the remaining checks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{BondVocabEntry, BookSample};
use crate::storage::{GraphEntity, GraphStore, RelationalStore, Table};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Graph,
    Relational,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Graph => f.write_str("graph"),
            StoreKind::Relational => f.write_str("relational"),
        }
    }
}

// ============================================================================
// Expectations
// ============================================================================

/// Expected counts keyed by store and entity name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    counts: BTreeMap<(StoreKind, String), u64>,
}

impl Expectations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, store: StoreKind, entity: impl Into<String>, count: u64) {
        self.counts.insert((store, entity.into()), count);
    }

    pub fn get(&self, store: StoreKind, entity: &str) -> Option<u64> {
        self.counts.get(&(store, entity.to_string())).copied()
    }

    /// Later entries override earlier ones.
    pub fn extend(&mut self, other: Expectations) {
        self.counts.extend(other.counts);
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((StoreKind, &str), u64)> + '_ {
        self.counts.iter().map(|((store, entity), n)| ((*store, entity.as_str()), *n))
    }

    /// Parse `entity=N`, `graph.entity=N` or `relational.table=N`.
    ///
    /// A bare name means the graph entity when one exists by that name,
    /// otherwise the relational table.
    pub fn parse_literal(literal: &str) -> Result<(StoreKind, String, u64)> {
        let bad = |why: &str| Error::Config(format!("invalid expectation '{literal}': {why}"));

        let (name, count) = literal.split_once('=').ok_or_else(|| bad("expected name=count"))?;
        let count: u64 = count.trim().parse().map_err(|_| bad("count is not a whole number"))?;
        let name = name.trim();

        let (store, entity) = match name.split_once('.') {
            Some(("graph", entity)) => (StoreKind::Graph, entity),
            Some(("relational", entity)) => (StoreKind::Relational, entity),
            Some(_) => return Err(bad("prefix must be graph. or relational.")),
            None if GraphEntity::from_name(name).is_some() => (StoreKind::Graph, name),
            None => (StoreKind::Relational, name),
        };

        let known = match store {
            StoreKind::Graph => GraphEntity::from_name(entity).is_some(),
            StoreKind::Relational => Table::from_name(entity).is_some(),
        };
        if !known {
            return Err(bad("unknown entity"));
        }
        Ok((store, entity.to_string(), count))
    }

    pub fn from_literals<I, S>(literals: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expect = Self::new();
        for literal in literals {
            let (store, entity, count) = Self::parse_literal(literal.as_ref())?;
            expect.insert(store, entity, count);
        }
        Ok(expect)
    }
}

// ============================================================================
// Report
// ============================================================================

/// One count check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub store: StoreKind,
    pub entity: String,
    pub actual: Option<u64>,
    pub expected: Option<u64>,
    /// Set when the count query itself failed.
    pub error: Option<String>,
}

impl Check {
    pub fn passed(&self) -> bool {
        match (&self.error, self.expected) {
            (Some(_), _) => false,
            (None, Some(expected)) => self.actual == Some(expected),
            (None, None) => true,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "{}: error ({error})", self.entity);
        }
        let actual = self.actual.unwrap_or_default();
        match self.expected {
            Some(expected) if expected != actual => write!(f, "{}: {actual} (expected {expected})", self.entity),
            Some(_) => write!(f, "{}: {actual} (ok)", self.entity),
            None => write!(f, "{}: {actual}", self.entity),
        }
    }
}

/// Everything one verification pass found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<Check>,
    pub top_books: Vec<BookSample>,
    pub top_vocab: Vec<BondVocabEntry>,
    /// Sample queries that failed; informational only.
    pub notes: Vec<String>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(Check::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed())
    }

    pub fn check(&self, store: StoreKind, entity: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.store == store && c.entity == entity)
    }

    pub fn merge(&mut self, other: VerificationReport) {
        self.checks.extend(other.checks);
        self.top_books.extend(other.top_books);
        self.top_vocab.extend(other.top_vocab);
        self.notes.extend(other.notes);
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for store in [StoreKind::Graph, StoreKind::Relational] {
            let mut checks = self.checks.iter().filter(|c| c.store == store).peekable();
            if checks.peek().is_none() {
                continue;
            }
            writeln!(f, "{store} store:")?;
            for check in checks {
                writeln!(f, "  {check}")?;
            }
        }
        if !self.top_books.is_empty() {
            writeln!(f, "top books by bond count:")?;
            for book in &self.top_books {
                writeln!(f, "  {book}")?;
            }
        }
        if !self.top_vocab.is_empty() {
            writeln!(f, "most frequent bonds:")?;
            for entry in &self.top_vocab {
                writeln!(f, "  {}: {}", entry.bond, entry.total_count)?;
            }
        }
        for note in &self.notes {
            writeln!(f, "note: {note}")?;
        }
        write!(f, "verification {}", if self.passed() { "passed" } else { "FAILED" })
    }
}

// ============================================================================
// ConsistencyVerifier
// ============================================================================

pub struct ConsistencyVerifier {
    sample_size: usize,
}

impl ConsistencyVerifier {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// Count every graph entity, then sample the busiest books.
    pub async fn verify_graph<G>(&self, store: &G, expect: &Expectations) -> VerificationReport
    where
        G: GraphStore + ?Sized,
    {
        let mut report = VerificationReport::default();
        for entity in GraphEntity::ALL {
            let result = store.count(entity).await;
            report.checks.push(record(StoreKind::Graph, entity.name(), result, expect));
        }
        if self.sample_size > 0 {
            match store.top_books(self.sample_size).await {
                Ok(books) => report.top_books = books,
                Err(e) => report.notes.push(format!("top books sample failed: {e}")),
            }
        }
        report
    }

    /// Count every table, then sample the most frequent vocabulary entries.
    pub async fn verify_relational<R>(&self, store: &mut R, expect: &Expectations) -> VerificationReport
    where
        R: RelationalStore + ?Sized,
    {
        let mut report = VerificationReport::default();
        for table in Table::ALL {
            let result = store.count(table).await;
            report.checks.push(record(StoreKind::Relational, table.name(), result, expect));
        }
        if self.sample_size > 0 {
            match store.top_vocab(self.sample_size).await {
                Ok(entries) => report.top_vocab = entries,
                Err(e) => report.notes.push(format!("top vocabulary sample failed: {e}")),
            }
        }
        report
    }

    pub async fn verify<G, R>(&self, graph: &G, relational: &mut R, expect: &Expectations) -> VerificationReport
    where
        G: GraphStore + ?Sized,
        R: RelationalStore + ?Sized,
    {
        if expect.is_empty() {
            tracing::info!("No expected counts given; reporting actual counts only");
        } else {
            tracing::info!(expected = expect.len(), "Checking counts against expectations");
        }
        let mut report = self.verify_graph(graph, expect).await;
        report.merge(self.verify_relational(relational, expect).await);

        for check in report.failures() {
            tracing::warn!(store = %check.store, entity = %check.entity, "Verification mismatch: {check}");
        }
        tracing::info!(checks = report.checks.len(), passed = report.passed(), "Verification finished");
        report
    }
}

fn record(store: StoreKind, entity: &str, result: Result<u64>, expect: &Expectations) -> Check {
    let expected = expect.get(store, entity);
    match result {
        Ok(actual) => Check { store, entity: entity.to_string(), actual: Some(actual), expected, error: None },
        Err(e) => {
            tracing::error!(store = %store, entity, error = %e, "Count query failed");
            Check { store, entity: entity.to_string(), actual: None, expected, error: Some(e.to_string()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BondNode;
    use crate::storage::{MemoryGraphStore, MemoryRelationalStore};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            Expectations::parse_literal("bonds=85200").unwrap(),
            (StoreKind::Graph, "bonds".to_string(), 85_200)
        );
        assert_eq!(
            Expectations::parse_literal("hyp_bond_vocab = 12").unwrap(),
            (StoreKind::Relational, "hyp_bond_vocab".to_string(), 12)
        );
        assert_eq!(
            Expectations::parse_literal("relational.bonds=3").unwrap().0,
            StoreKind::Relational
        );
        assert!(Expectations::parse_literal("bonds").is_err());
        assert!(Expectations::parse_literal("nodes=1").is_err());
        assert!(Expectations::parse_literal("bonds=-1").is_err());
    }

    #[test]
    fn test_check_rendering() {
        let check = Check {
            store: StoreKind::Graph,
            entity: "bonds".into(),
            actual: Some(85_157),
            expected: Some(85_200),
            error: None,
        };
        assert_eq!(check.to_string(), "bonds: 85157 (expected 85200)");
        assert!(!check.passed());
    }

    #[tokio::test]
    async fn test_mismatch_does_not_stop_other_checks() {
        let graph = MemoryGraphStore::new();
        graph.create_bonds(&[BondNode::new("b1", "dark", "forest")]).await.unwrap();
        let mut relational = MemoryRelationalStore::new();

        let expect = Expectations::from_literals(["bonds=2", "books=0", "word_coordinates=0"]).unwrap();
        let report = ConsistencyVerifier::new(3).verify(&graph, &mut relational, &expect).await;

        assert_eq!(report.checks.len(), GraphEntity::ALL.len() + Table::ALL.len());
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert!(report.check(StoreKind::Graph, "books").unwrap().passed());
        assert!(report.to_string().contains("bonds: 1 (expected 2)"));
    }
}
