//! Vocabulary imports accumulate `total_count` instead of overwriting it.

use std::collections::BTreeMap;

use corpus_migrate::{
    BondVocabEntry, MemoryRelationalStore, MigrationConfig, RecordWriter, RelationalStore, RelationalStoreClient,
    Table,
};
use proptest::prelude::*;

fn write_vocab(dir: &std::path::Path, entries: &[BondVocabEntry]) {
    let mut writer = RecordWriter::<BondVocabEntry>::create(&dir.join("hyp_bond_vocab.csv")).unwrap();
    writer.write_all(entries).unwrap();
    writer.finish().unwrap();
}

async fn import_twice(dir: &std::path::Path, store: &mut MemoryRelationalStore) {
    let config = MigrationConfig::new(dir).with_batch_size(3);
    let mut client = RelationalStoreClient::new(store, &config);
    client.load_bond_vocab(dir).await.unwrap().unwrap();
    client.load_bond_vocab(dir).await.unwrap().unwrap();
}

fn vocab_strategy() -> impl Strategy<Value = Vec<BondVocabEntry>> {
    prop::collection::btree_map("[a-z]{1,6}_[a-z]{1,6}", (1i32..10_000, 1i32..50), 1..20).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(bond, (total, books))| {
                let mut entry = BondVocabEntry::new(bond, total);
                entry.book_count = books;
                entry
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_double_import_doubles_totals(entries in vocab_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        write_vocab(dir.path(), &entries);

        let mut store = MemoryRelationalStore::new();
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(import_twice(dir.path(), &mut store));

        for entry in &entries {
            let merged = store.vocab(&entry.bond).unwrap();
            prop_assert_eq!(merged.total_count, entry.total_count * 2);
            prop_assert_eq!(merged.book_count, entry.book_count);
        }
        let count = runtime.block_on(store.count(Table::BondVocab)).unwrap();
        prop_assert_eq!(count, entries.len() as u64);
    }
}

#[tokio::test]
async fn test_repeated_keys_in_one_file_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    write_vocab(
        dir.path(),
        &[
            BondVocabEntry::new("dark_forest", 2),
            BondVocabEntry::new("old_tree", 1),
            BondVocabEntry::new("dark_forest", 3),
            BondVocabEntry::new("cold_river", 4),
            BondVocabEntry::new("dark_forest", 5),
        ],
    );

    let mut store = MemoryRelationalStore::new();
    import_twice(dir.path(), &mut store).await;

    let totals: BTreeMap<String, i32> = ["dark_forest", "old_tree", "cold_river"]
        .into_iter()
        .map(|bond| (bond.to_string(), store.vocab(bond).unwrap().total_count))
        .collect();
    assert_eq!(totals["dark_forest"], 20);
    assert_eq!(totals["old_tree"], 2);
    assert_eq!(totals["cold_river"], 8);
}
