//! In-memory relational store.
//!
//! Tables are ordered maps keyed the same way as the SQL primary/unique
//! keys, and every conflict policy matches the PostgreSQL statements.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;

use crate::model::{BondVocabEntry, LearnedBond, RelationalBond, WordCoordinate};
use crate::retry::Connector;
use crate::storage::Table;
use crate::{Error, Result};
use super::RelationalStore;

/// In-memory tables. `Clone` shares state.
#[derive(Clone, Default)]
pub struct MemoryRelationalStore {
    inner: Arc<MemoryRelationalInner>,
}

#[derive(Default)]
struct MemoryRelationalInner {
    word_coordinates: RwLock<BTreeMap<String, WordCoordinate>>,
    bonds: RwLock<BTreeMap<(String, String), RelationalBond>>,
    vocab: RwLock<BTreeMap<String, BondVocabEntry>>,
    learned: RwLock<BTreeMap<(String, String), LearnedBond>>,
    schema_ready: AtomicBool,
    refuse_connects: AtomicU32,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.refuse_connects.store(n, Ordering::SeqCst);
    }

    pub fn schema_ready(&self) -> bool {
        self.inner.schema_ready.load(Ordering::SeqCst)
    }

    pub fn vocab(&self, bond: &str) -> Option<BondVocabEntry> {
        self.inner.vocab.read().get(bond).cloned()
    }

    pub fn word(&self, word: &str) -> Option<WordCoordinate> {
        self.inner.word_coordinates.read().get(word).cloned()
    }

    pub fn learned(&self, adj: &str, noun: &str) -> Option<LearnedBond> {
        self.inner.learned.read().get(&(adj.to_string(), noun.to_string())).cloned()
    }
}

fn snapshot<'a, T: Send + 'a>(rows: Vec<T>) -> BoxStream<'a, Result<T>> {
    stream::iter(rows.into_iter().map(Ok)).boxed()
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn ensure_schema(&mut self) -> Result<()> {
        self.inner.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn truncate(&mut self, table: Table) -> Result<()> {
        match table {
            Table::WordCoordinates => self.inner.word_coordinates.write().clear(),
            Table::Bonds => self.inner.bonds.write().clear(),
            Table::BondVocab => self.inner.vocab.write().clear(),
            Table::LearnedBonds => self.inner.learned.write().clear(),
        }
        Ok(())
    }

    async fn count(&mut self, table: Table) -> Result<u64> {
        let n = match table {
            Table::WordCoordinates => self.inner.word_coordinates.read().len(),
            Table::Bonds => self.inner.bonds.read().len(),
            Table::BondVocab => self.inner.vocab.read().len(),
            Table::LearnedBonds => self.inner.learned.read().len(),
        };
        Ok(n as u64)
    }

    fn stream_word_coordinates(&mut self) -> BoxStream<'_, Result<WordCoordinate>> {
        snapshot(self.inner.word_coordinates.read().values().cloned().collect())
    }

    fn stream_bond_vocab(&mut self) -> BoxStream<'_, Result<BondVocabEntry>> {
        snapshot(self.inner.vocab.read().values().cloned().collect())
    }

    fn stream_learned_bonds(&mut self) -> BoxStream<'_, Result<LearnedBond>> {
        snapshot(self.inner.learned.read().values().cloned().collect())
    }

    async fn upsert_word_coordinates(&mut self, rows: &[WordCoordinate]) -> Result<u64> {
        let mut table = self.inner.word_coordinates.write();
        for row in rows {
            match table.get_mut(&row.word) {
                Some(existing) => {
                    existing.a = row.a;
                    existing.s = row.s;
                    existing.tau = row.tau;
                    existing.source = row.source.clone();
                }
                None => {
                    let mut row = row.clone();
                    row.created_at = row.created_at.or_else(|| Some(now()));
                    table.insert(row.word.clone(), row);
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_bonds(&mut self, rows: &[RelationalBond]) -> Result<u64> {
        let mut table = self.inner.bonds.write();
        for row in rows {
            match table.get_mut(&row.key()) {
                Some(existing) => {
                    existing.a = row.a;
                    existing.s = row.s;
                    existing.tau = row.tau;
                }
                None => {
                    table.insert(row.key(), row.clone());
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn insert_learned_bonds(&mut self, rows: &[LearnedBond]) -> Result<u64> {
        let mut table = self.inner.learned.write();
        let mut inserted = 0;
        for row in rows {
            if !table.contains_key(&row.key()) {
                table.insert(row.key(), row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn copy_bond_vocab(&mut self, rows: &[BondVocabEntry]) -> Result<u64> {
        let mut table = self.inner.vocab.write();
        for row in rows {
            match table.get_mut(&row.bond) {
                Some(existing) => existing.absorb(row.clone()),
                None => {
                    let mut row = row.clone();
                    row.created_at = row.created_at.or_else(|| Some(now()));
                    table.insert(row.bond.clone(), row);
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn top_vocab(&mut self, limit: usize) -> Result<Vec<BondVocabEntry>> {
        let mut rows: Vec<BondVocabEntry> = self.inner.vocab.read().values().cloned().collect();
        rows.sort_by(|a, b| b.total_count.cmp(&a.total_count).then_with(|| a.bond.cmp(&b.bond)));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl Connector for MemoryRelationalStore {
    type Store = MemoryRelationalStore;

    fn endpoint(&self) -> String {
        "memory://relational".to_string()
    }

    async fn connect(&self) -> Result<MemoryRelationalStore> {
        let refused = self
            .inner
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match refused {
            Ok(_) => Err(Error::Relational("connection refused".into())),
            Err(_) => Ok(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_vocab_accumulates_total_count() {
        let mut db = MemoryRelationalStore::new();
        let mut first = BondVocabEntry::new("dark_forest", 3);
        first.book_count = 1;
        let mut second = BondVocabEntry::new("dark_forest", 4);
        second.book_count = 5;

        db.copy_bond_vocab(&[first]).await.unwrap();
        db.copy_bond_vocab(&[second]).await.unwrap();

        let entry = db.vocab("dark_forest").unwrap();
        assert_eq!(entry.total_count, 7);
        assert_eq!(entry.book_count, 5);
        assert!(entry.created_at.is_some());
    }

    #[tokio::test]
    async fn test_learned_bonds_first_write_wins() {
        let mut db = MemoryRelationalStore::new();
        let mut first = LearnedBond::new("dark", "forest");
        first.confidence = 0.9;
        let mut second = LearnedBond::new("dark", "forest");
        second.confidence = 0.1;

        assert_eq!(db.insert_learned_bonds(&[first]).await.unwrap(), 1);
        assert_eq!(db.insert_learned_bonds(&[second]).await.unwrap(), 0);
        assert_eq!(db.learned("dark", "forest").unwrap().confidence, 0.9);
    }

    #[tokio::test]
    async fn test_word_coordinates_replace() {
        let mut db = MemoryRelationalStore::new();
        db.upsert_word_coordinates(&[WordCoordinate::new("shadow", 0.1, 0.1, 2.0, "json")]).await.unwrap();
        db.upsert_word_coordinates(&[WordCoordinate::new("shadow", -0.5, 0.3, 3.0, "csv")]).await.unwrap();

        let word = db.word("shadow").unwrap();
        assert_eq!((word.a, word.s, word.tau), (-0.5, 0.3, 3.0));
        assert_eq!(word.source, "csv");
        assert_eq!(db.count(Table::WordCoordinates).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_is_key_ordered() {
        let mut db = MemoryRelationalStore::new();
        db.copy_bond_vocab(&[BondVocabEntry::new("b_x", 1), BondVocabEntry::new("a_x", 1)]).await.unwrap();
        let rows: Vec<BondVocabEntry> = db.stream_bond_vocab().try_collect().await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.bond.as_str()).collect();
        assert_eq!(keys, vec!["a_x", "b_x"]);
    }
}
