//! # Migration Orchestrator
//!
//! Drives one top-level operation through its phases:
//!
//! ```text
//! Init → Connect → Export → [Verify] → Done
//! Init → Connect → [Clear] → Index → LoadNodes → LoadEdges → DeriveRelationships → [Verify] → Done
//! Init → Connect → Verify → Done
//! ```
//!
//! Any failure moves the run to `Failed`. Both stores are connected before
//! the first phase that touches data, so a connection failure never leaves
//! a half-cleared target behind.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::client::{GraphStoreClient, LoadStats, RelationalStoreClient};
use crate::config::MigrationConfig;
use crate::derive::{DeriveStats, RelationshipDeriver};
use crate::manifest::{Manifest, Operation};
use crate::retry::{connect_with_retry, Clock, Connector, TokioClock};
use crate::storage::{GraphEntity, GraphStore, RelationalStore, Table};
use crate::verify::{ConsistencyVerifier, Expectations, StoreKind, VerificationReport};
use crate::{Error, Result};

// ============================================================================
// Phase
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Connect,
    Export,
    Clear,
    Index,
    LoadNodes,
    LoadEdges,
    DeriveRelationships,
    Verify,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        if to == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Init, Connect)
                | (Connect, Export | Clear | Index | Verify)
                | (Export, Verify | Done)
                | (Clear, Index)
                | (Index, LoadNodes)
                | (LoadNodes, LoadEdges)
                | (LoadEdges, DeriveRelationships)
                | (DeriveRelationships, Verify | Done)
                | (Verify, Done)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Connect => "connect",
            Phase::Export => "export",
            Phase::Clear => "clear",
            Phase::Index => "index",
            Phase::LoadNodes => "load_nodes",
            Phase::LoadEdges => "load_edges",
            Phase::DeriveRelationships => "derive_relationships",
            Phase::Verify => "verify",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RunReport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Export,
    Import,
    Verify,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunKind::Export => f.write_str("export"),
            RunKind::Import => f.write_str("import"),
            RunKind::Verify => f.write_str("verify"),
        }
    }
}

/// What one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub kind: RunKind,
    pub phases: Vec<Phase>,
    pub manifest: Option<Manifest>,
    /// Per-dataset load counters, keyed by target store and entity.
    pub loads: BTreeMap<(StoreKind, String), LoadStats>,
    pub derived: Option<DeriveStats>,
    pub verification: Option<VerificationReport>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(kind: RunKind) -> Self {
        Self {
            kind,
            phases: vec![Phase::Init],
            manifest: None,
            loads: BTreeMap::new(),
            derived: None,
            verification: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Init)
    }

    fn enter(&mut self, to: Phase) -> Result<()> {
        let from = self.phase();
        if !from.can_transition(to) {
            return Err(Error::InvalidPhase { from, to });
        }
        tracing::info!(run = %self.kind, phase = %to, "Entering phase");
        self.phases.push(to);
        Ok(())
    }

    /// Verification ran and found a mismatch.
    pub fn verification_failed(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| !v.passed())
    }

    /// Rows dropped across every load.
    pub fn dropped(&self) -> u64 {
        self.loads.values().map(LoadStats::dropped).sum()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} finished in {:.1}s", self.kind, self.elapsed.as_secs_f64());
        if let Some(manifest) = &self.manifest {
            for (entity, n) in &manifest.graph {
                let _ = writeln!(out, "  graph {entity}: {n}");
            }
            for (table, n) in &manifest.relational {
                let _ = writeln!(out, "  relational {table}: {n}");
            }
            let skipped = manifest.total_skipped();
            if skipped > 0 {
                let _ = writeln!(out, "  rows not loaded: {skipped}");
            }
        }
        for ((store, entity), stats) in &self.loads {
            if stats.dropped() > 0 || stats.coerced > 0 || stats.out_of_range > 0 {
                let _ = writeln!(
                    out,
                    "  {store} {entity}: skipped {}, self-loops {}, defaulted fields {}, out of range {}",
                    stats.skipped, stats.self_loops, stats.coerced, stats.out_of_range
                );
            }
        }
        if let Some(derived) = &self.derived {
            let _ = writeln!(out, "  contains: {} pairs over {} books, {} new", derived.pairs, derived.books, derived.created);
        }
        if let Some(verification) = &self.verification {
            let _ = writeln!(out, "{verification}");
        }
        out.trim_end().to_string()
    }
}

// ============================================================================
// MigrationOrchestrator
// ============================================================================

pub struct MigrationOrchestrator {
    config: MigrationConfig,
    expect: Expectations,
    clock: Arc<dyn Clock>,
    last_phases: Mutex<Vec<Phase>>,
}

impl MigrationOrchestrator {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            expect: Expectations::new(),
            clock: Arc::new(TokioClock::new()),
            last_phases: Mutex::new(Vec::new()),
        }
    }

    /// Literal counts checked by every verification pass, on top of the
    /// counts a run derives for itself.
    pub fn with_expectations(mut self, expect: Expectations) -> Self {
        self.expect = expect;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Phase history of the most recent run, including failed ones.
    pub fn last_phases(&self) -> Vec<Phase> {
        self.last_phases.lock().clone()
    }

    // ========================================================================
    // Top-level operations
    // ========================================================================

    /// Export both stores to the data directory and write `manifest.json`.
    /// With `verify`, the source is then checked against the rows written.
    pub async fn export<GC, RC>(&self, graph: &GC, relational: &RC, verify: bool) -> Result<RunReport>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        self.config.validate()?;
        let mut report = RunReport::new(RunKind::Export);
        let started = Instant::now();
        let result = self.run_export(&mut report, graph, relational, verify).await;
        self.close(report, started, result)
    }

    /// Load the data directory into both stores and write
    /// `manifest.import.json`. With `verify`, the target is checked against
    /// what the export manifest and this run's counters say it should hold.
    pub async fn import<GC, RC>(&self, graph: &GC, relational: &RC, verify: bool) -> Result<RunReport>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        self.config.validate()?;
        let mut report = RunReport::new(RunKind::Import);
        let started = Instant::now();
        let result = self.run_import(&mut report, graph, relational, verify).await;
        self.close(report, started, result)
    }

    /// Read-only counts and samples against both stores.
    pub async fn verify<GC, RC>(&self, graph: &GC, relational: &RC) -> Result<RunReport>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        let mut report = RunReport::new(RunKind::Verify);
        let started = Instant::now();
        let result = self.run_verify(&mut report, graph, relational).await;
        self.close(report, started, result)
    }

    /// Export from the source stores, import into the target stores, verify
    /// the target.
    pub async fn migrate<SG, SR, TG, TR>(
        &self,
        source: (&SG, &SR),
        target: (&TG, &TR),
    ) -> Result<Vec<RunReport>>
    where
        SG: Connector + ?Sized,
        SG::Store: GraphStore,
        SR: Connector + ?Sized,
        SR::Store: RelationalStore,
        TG: Connector + ?Sized,
        TG::Store: GraphStore,
        TR: Connector + ?Sized,
        TR::Store: RelationalStore,
    {
        let exported = self.export(source.0, source.1, false).await?;
        let imported = self.import(target.0, target.1, true).await?;
        Ok(vec![exported, imported])
    }

    // ========================================================================
    // Runs
    // ========================================================================

    async fn run_export<GC, RC>(&self, report: &mut RunReport, graph: &GC, relational: &RC, verify: bool) -> Result<()>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        report.enter(Phase::Connect)?;
        let graph = self.connect(graph).await?;
        let mut relational = self.connect(relational).await?;

        report.enter(Phase::Export)?;
        let dir = self.config.data_dir();
        let mut manifest = Manifest::new(Operation::Export);
        manifest.graph = GraphStoreClient::new(&graph, &self.config).export(dir).await?;
        manifest.relational = RelationalStoreClient::new(&mut relational, &self.config).export(dir).await?;
        manifest.save(dir)?;

        if verify {
            report.enter(Phase::Verify)?;
            let mut expect = manifest.expectations();
            expect.extend(self.expect.clone());
            report.verification = Some(self.verifier().verify(&graph, &mut relational, &expect).await);
        }
        report.manifest = Some(manifest);
        report.enter(Phase::Done)
    }

    async fn run_import<GC, RC>(&self, report: &mut RunReport, graph: &GC, relational: &RC, verify: bool) -> Result<()>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        report.enter(Phase::Connect)?;
        let graph = self.connect(graph).await?;
        let mut relational = self.connect(relational).await?;

        let dir = self.config.data_dir();
        let graph_client = GraphStoreClient::new(&graph, &self.config);

        if self.config.clear {
            report.enter(Phase::Clear)?;
            graph_client.clear().await?;
            let mut rel_client = RelationalStoreClient::new(&mut relational, &self.config);
            rel_client.ensure_schema().await?;
            rel_client.clear().await?;
        }

        report.enter(Phase::Index)?;
        graph_client.create_indexes().await?;
        RelationalStoreClient::new(&mut relational, &self.config).ensure_schema().await?;

        report.enter(Phase::LoadNodes)?;
        record(report, StoreKind::Graph, GraphEntity::Books.name(), graph_client.load_books(dir).await?);
        record(report, StoreKind::Graph, GraphEntity::Bonds.name(), graph_client.load_bonds(dir).await?);
        {
            let mut rel_client = RelationalStoreClient::new(&mut relational, &self.config);
            record(report, StoreKind::Relational, Table::WordCoordinates.name(), rel_client.load_word_coordinates(dir).await?);
            record(report, StoreKind::Relational, Table::Bonds.name(), rel_client.load_bonds(dir).await?);
            record(report, StoreKind::Relational, Table::BondVocab.name(), rel_client.load_bond_vocab(dir).await?);
            record(report, StoreKind::Relational, Table::LearnedBonds.name(), rel_client.load_learned_bonds(dir).await?);
        }

        report.enter(Phase::LoadEdges)?;
        record(report, StoreKind::Graph, GraphEntity::Follows.name(), graph_client.load_follows(dir).await?);

        report.enter(Phase::DeriveRelationships)?;
        let derived = RelationshipDeriver::new(&graph, self.config.batch_size).derive().await?;
        report.derived = Some(derived);

        let manifest = self.import_manifest(report, derived);
        manifest.save(dir)?;
        report.manifest = Some(manifest);

        if verify {
            report.enter(Phase::Verify)?;
            let expect = self.import_expectations(report)?;
            report.verification = Some(self.verifier().verify(&graph, &mut relational, &expect).await);
        }
        report.enter(Phase::Done)
    }

    async fn run_verify<GC, RC>(&self, report: &mut RunReport, graph: &GC, relational: &RC) -> Result<()>
    where
        GC: Connector + ?Sized,
        GC::Store: GraphStore,
        RC: Connector + ?Sized,
        RC::Store: RelationalStore,
    {
        report.enter(Phase::Connect)?;
        let graph = self.connect(graph).await?;
        let mut relational = self.connect(relational).await?;

        report.enter(Phase::Verify)?;
        report.verification = Some(self.verifier().verify(&graph, &mut relational, &self.expect).await);
        report.enter(Phase::Done)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn connect<C>(&self, connector: &C) -> Result<C::Store>
    where
        C: Connector + ?Sized,
    {
        tracing::info!(endpoint = %connector.endpoint(), "Connecting");
        connect_with_retry(connector, &self.config.retry, self.clock.as_ref()).await
    }

    fn verifier(&self) -> ConsistencyVerifier {
        ConsistencyVerifier::new(self.config.sample_size)
    }

    fn close(&self, mut report: RunReport, started: Instant, result: Result<()>) -> Result<RunReport> {
        report.elapsed = started.elapsed();
        match result {
            Ok(()) => {
                *self.last_phases.lock() = report.phases.clone();
                tracing::info!(run = %report.kind, elapsed_ms = report.elapsed.as_millis() as u64, "Run complete");
                Ok(report)
            }
            Err(e) => {
                let phase = report.phase();
                report.phases.push(Phase::Failed);
                *self.last_phases.lock() = report.phases;
                tracing::error!(run = %report.kind, phase = %phase, error = %e, "Run failed");
                Err(e)
            }
        }
    }

    fn import_manifest(&self, report: &RunReport, derived: DeriveStats) -> Manifest {
        let mut manifest = Manifest::new(Operation::Import);
        for ((store, entity), stats) in &report.loads {
            match store {
                StoreKind::Graph => {
                    if let Some(entity) = GraphEntity::from_name(entity) {
                        manifest.graph.insert(entity, stats.loaded);
                    }
                }
                StoreKind::Relational => {
                    if let Some(table) = Table::from_name(entity) {
                        manifest.relational.insert(table, stats.loaded);
                    }
                }
            }
            if stats.dropped() > 0 {
                manifest.skipped.insert(format!("{store}.{entity}"), stats.dropped());
            }
        }
        manifest.graph.insert(GraphEntity::Contains, derived.pairs);
        manifest
    }

    /// Counts the target should hold after this import.
    ///
    /// With a cleared target, an export manifest in the data directory gives
    /// the row counts, less whatever this run dropped. Without one, bulk
    /// created entities must match their load counters. Literal expectations
    /// override both.
    fn import_expectations(&self, report: &RunReport) -> Result<Expectations> {
        let mut expect = Expectations::new();
        if self.config.clear {
            match Manifest::find(self.config.data_dir(), Operation::Export)? {
                Some(exported) => {
                    for ((store, entity), count) in exported.expectations().iter() {
                        let dropped = report.loads.get(&(store, entity.to_string())).map_or(0, LoadStats::dropped);
                        expect.insert(store, entity, count.saturating_sub(dropped));
                    }
                }
                None => {
                    for entity in [GraphEntity::Bonds, GraphEntity::Follows] {
                        if let Some(stats) = report.loads.get(&(StoreKind::Graph, entity.name().to_string())) {
                            expect.insert(StoreKind::Graph, entity.name(), stats.loaded);
                        }
                    }
                }
            }
        }
        expect.extend(self.expect.clone());
        Ok(expect)
    }
}

fn record(report: &mut RunReport, store: StoreKind, entity: &str, stats: Option<LoadStats>) {
    if let Some(stats) = stats {
        report.loads.insert((store, entity.to_string()), stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{FakeClock, RetryPolicy};
    use crate::storage::{MemoryGraphStore, MemoryRelationalStore};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Init.can_transition(Phase::Connect));
        assert!(Phase::Connect.can_transition(Phase::Index));
        assert!(Phase::LoadEdges.can_transition(Phase::Failed));
        assert!(!Phase::Init.can_transition(Phase::LoadNodes));
        assert!(!Phase::LoadEdges.can_transition(Phase::LoadNodes));
        assert!(!Phase::Done.can_transition(Phase::Failed));
    }

    #[test]
    fn test_illegal_transition_is_an_error() {
        let mut report = RunReport::new(RunKind::Import);
        let err = report.enter(Phase::LoadEdges).unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { from: Phase::Init, to: Phase::LoadEdges }));
    }

    #[tokio::test]
    async fn test_connection_failure_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let graph = MemoryGraphStore::new();
        graph.create_bonds(&[crate::model::BondNode::new("b1", "dark", "forest")]).await.unwrap();
        let relational = MemoryRelationalStore::new();
        relational.fail_next_connects(u32::MAX);

        let config = MigrationConfig::new(dir.path()).with_retry(RetryPolicy::new(3, Duration::from_secs(2)));
        let clock = Arc::new(FakeClock::new());
        let orchestrator = MigrationOrchestrator::new(config).with_clock(clock.clone());

        let err = orchestrator.import(&graph, &relational, true).await.unwrap_err();
        assert!(matches!(err, Error::Connection { attempts: 3, .. }));
        assert_eq!(orchestrator.last_phases(), vec![Phase::Init, Phase::Connect, Phase::Failed]);
        assert_eq!(graph.count(GraphEntity::Bonds).await.unwrap(), 1);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_import_only_without_clear_skips_phase() {
        let dir = tempfile::tempdir().unwrap();
        let graph = MemoryGraphStore::new();
        let relational = MemoryRelationalStore::new();
        let config = MigrationConfig::new(dir.path()).with_clear(false);

        let report = MigrationOrchestrator::new(config).import(&graph, &relational, false).await.unwrap();
        assert_eq!(
            report.phases,
            vec![
                Phase::Init,
                Phase::Connect,
                Phase::Index,
                Phase::LoadNodes,
                Phase::LoadEdges,
                Phase::DeriveRelationships,
                Phase::Done,
            ]
        );
        assert!(relational.schema_ready());
        assert!(dir.path().join("manifest.import.json").is_file());
    }
}
