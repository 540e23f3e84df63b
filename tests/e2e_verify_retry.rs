//! Verification against expected literals, and connection retry through the
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use corpus_migrate::{
    BondNode, Error, Expectations, FakeClock, GraphStore, MemoryGraphStore, MemoryRelationalStore, MigrationConfig,
    MigrationOrchestrator, Phase, RetryPolicy, StoreKind,
};
use pretty_assertions::assert_eq;

async fn graph_with_bonds(n: usize) -> MemoryGraphStore {
    let graph = MemoryGraphStore::new();
    let bonds: Vec<BondNode> = (0..n).map(|i| BondNode::new(format!("b{i:06}"), "adj", format!("noun{i}"))).collect();
    for chunk in bonds.chunks(10_000) {
        graph.create_bonds(chunk).await.unwrap();
    }
    graph
}

#[tokio::test]
async fn test_bond_count_mismatch_reported_without_abort() {
    let dir = tempfile::tempdir().unwrap();
    let graph = graph_with_bonds(85_157).await;
    let relational = MemoryRelationalStore::new();

    let expect = Expectations::from_literals(["bonds=85200", "books=0", "learned_bonds=0"]).unwrap();
    let orchestrator = MigrationOrchestrator::new(MigrationConfig::new(dir.path())).with_expectations(expect);
    let report = orchestrator.verify(&graph, &relational).await.unwrap();

    assert!(report.verification_failed());
    let verification = report.verification.as_ref().unwrap();
    assert_eq!(verification.failures().count(), 1);
    assert_eq!(
        verification.check(StoreKind::Graph, "bonds").unwrap().to_string(),
        "bonds: 85157 (expected 85200)"
    );
    assert!(verification.check(StoreKind::Graph, "books").unwrap().passed());
    assert!(verification.check(StoreKind::Relational, "learned_bonds").unwrap().passed());
    assert!(report.summary().contains("bonds: 85157 (expected 85200)"));
    assert_eq!(report.phases, vec![Phase::Init, Phase::Connect, Phase::Verify, Phase::Done]);
}

#[tokio::test]
async fn test_samples_included_in_report() {
    let dir = tempfile::tempdir().unwrap();
    let graph = graph_with_bonds(3).await;
    let orchestrator = MigrationOrchestrator::new(MigrationConfig::new(dir.path()));
    let report = orchestrator.verify(&graph, &MemoryRelationalStore::new()).await.unwrap();

    let verification = report.verification.unwrap();
    assert!(verification.passed());
    assert!(verification.top_books.is_empty());
    assert_eq!(verification.checks.len(), 10);
}

#[tokio::test]
async fn test_connect_retries_then_exports() {
    let dir = tempfile::tempdir().unwrap();
    let graph = graph_with_bonds(2).await;
    graph.fail_next_connects(4);
    let relational = MemoryRelationalStore::new();
    relational.fail_next_connects(1);

    let clock = Arc::new(FakeClock::new());
    let orchestrator = MigrationOrchestrator::new(MigrationConfig::new(dir.path())).with_clock(clock.clone());
    let report = orchestrator.export(&graph, &relational, false).await.unwrap();

    assert_eq!(report.manifest.unwrap().graph[&corpus_migrate::GraphEntity::Bonds], 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 5]);
}

#[tokio::test]
async fn test_unreachable_store_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let graph = graph_with_bonds(2).await;
    graph.fail_next_connects(u32::MAX);

    let config = MigrationConfig::new(dir.path()).with_retry(RetryPolicy::new(30, Duration::from_secs(2)));
    let orchestrator = MigrationOrchestrator::new(config).with_clock(Arc::new(FakeClock::new()));
    let err = orchestrator.export(&graph, &MemoryRelationalStore::new(), false).await.unwrap_err();

    match err {
        Error::Connection { endpoint, attempts, .. } => {
            assert_eq!(endpoint, "memory://graph");
            assert_eq!(attempts, 30);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dir.path().join("manifest.json").exists());
    assert!(!dir.path().join("bonds.csv").exists());
    assert_eq!(orchestrator.last_phases(), vec![Phase::Init, Phase::Connect, Phase::Failed]);
}
