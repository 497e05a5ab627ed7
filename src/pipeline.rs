// 🚦 Pipeline - One batch run, start to finish
//
// wide rows → revision resolver → read history → latest-version resolver
//   over history + batch → append (all or nothing) → change classification
//   → ranking → RunReport
//
// A structural defect aborts the run before anything is appended.
// Re-running the whole pipeline is the recovery path; nothing here retries.

use crate::change::{classify_period, ChangeOutcome};
use crate::config::PipelineConfig;
use crate::ranking::{RankEntry, RankWarning, RankingEngine};
use crate::records::{EntityCode, LongRecord, Period, RunId, WideRecord};
use crate::revision::{ReportConflict, Revision, RevisionOutcome, RevisionResolver};
use crate::scopes::ScopeRegistry;
use crate::snapshot::{resolve_latest, ResolveError, ResolvedSnapshot};
use crate::store::{check_batch, RecordLog, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("store holds no records; nothing to rank")]
    EmptySnapshot,
}

impl PipelineError {
    /// Defect in the data or run ordering rather than an environment failure
    pub fn is_structural(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_structural(),
            PipelineError::Resolve(_) => true,
            PipelineError::EmptySnapshot => false,
        }
    }
}

// ============================================================================
// RUN MANIFEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Resolving,
    Appending,
    Ranking,
    Completed,
    Failed,
}

/// Where a run got to, and what it saw on the way
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub steps_completed: Vec<String>,
    pub rows_received: usize,
    pub rows_publishable: usize,
    pub entities_with_data: usize,
    pub rows_appended: usize,
    pub latest_period: Option<Period>,
    pub failure_reason: Option<String>,
}

impl RunManifest {
    pub fn new(run_id: RunId) -> Self {
        RunManifest {
            run_id,
            started_at: Utc::now(),
            status: RunStatus::Started,
            steps_completed: Vec::new(),
            rows_received: 0,
            rows_publishable: 0,
            entities_with_data: 0,
            rows_appended: 0,
            latest_period: None,
            failure_reason: None,
        }
    }

    fn advance(&mut self, status: RunStatus) {
        info!(run = %self.run_id, status = ?status, "run status");
        self.status = status;
    }

    fn complete_step(&mut self, step: &str) {
        self.steps_completed.push(step.to_string());
    }

    fn fail(&mut self, err: &PipelineError) {
        self.status = RunStatus::Failed;
        self.failure_reason = Some(err.to_string());
        error!(
            run = %self.run_id,
            steps = ?self.steps_completed,
            structural = err.is_structural(),
            "run failed: {}",
            err
        );
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Everything downstream rendering consumes, as plain data
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,

    /// Period the changes and ranks are for
    pub period: Period,
    pub manifest: RunManifest,
    pub resolution: String,
    pub revisions: Vec<Revision>,
    pub conflicts: Vec<ReportConflict>,
    pub rows_appended: usize,
    pub store_records: usize,
    pub snapshot: Vec<LongRecord>,
    pub snapshot_digest: String,
    pub changes: Vec<ChangeOutcome>,
    pub ranks: Vec<RankEntry>,
    pub warnings: Vec<RankWarning>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} appended, store {} rows, {} current facts, {} ranks for {}, {} warnings",
            self.run_id.label(),
            self.rows_appended,
            self.store_records,
            self.snapshot.len(),
            self.ranks.len(),
            self.period.label(),
            self.warnings.len()
        )
    }

    pub fn change_for(&self, entity: &EntityCode) -> Option<&ChangeOutcome> {
        self.changes.iter().find(|c| c.entity() == entity)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    resolver: RevisionResolver,
    ranking: RankingEngine,
    registry: ScopeRegistry,

    /// Rank this period instead of the snapshot's latest
    period_override: Option<Period>,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, registry: ScopeRegistry) -> Self {
        Pipeline {
            resolver: RevisionResolver::new(),
            ranking: RankingEngine::with_direction(config.ranking.direction),
            registry,
            period_override: config.ranking.period,
        }
    }

    /// Run one batch against `log`
    pub fn run(
        &self,
        log: &mut dyn RecordLog,
        rows: &[WideRecord],
        run_id: RunId,
    ) -> Result<RunReport, PipelineError> {
        let mut manifest = RunManifest::new(run_id);
        match self.run_steps(log, rows, &mut manifest) {
            Ok(report) => Ok(report),
            Err(err) => {
                manifest.fail(&err);
                Err(err)
            }
        }
    }

    /// Resolve the store as it stands, without appending
    pub fn resolve(&self, log: &dyn RecordLog) -> Result<ResolvedSnapshot, PipelineError> {
        let history = log.read_all()?;
        Ok(resolve_latest(&history)?)
    }

    fn run_steps(
        &self,
        log: &mut dyn RecordLog,
        rows: &[WideRecord],
        manifest: &mut RunManifest,
    ) -> Result<RunReport, PipelineError> {
        let run_id = manifest.run_id;

        manifest.advance(RunStatus::Resolving);
        let outcome: RevisionOutcome = self.resolver.resolve(rows, run_id);
        manifest.rows_received = outcome.rows_received;
        manifest.rows_publishable = outcome.rows_publishable;
        manifest.entities_with_data = outcome.entities().len();
        manifest.complete_step("resolve");
        info!(run = %run_id, "{}", outcome.summary());

        // Everything that can reject the run happens before the append
        let mut history = log.read_all()?;
        check_batch(run_id, &outcome.records, history.iter().map(|r| r.run_id).max())?;
        history.extend(outcome.records.iter().cloned());
        let snapshot = resolve_latest(&history)?;
        let period = self
            .period_override
            .or_else(|| snapshot.latest_period())
            .ok_or(PipelineError::EmptySnapshot)?;
        manifest.latest_period = snapshot.latest_period();

        manifest.advance(RunStatus::Appending);
        let rows_appended = log.append(run_id, &outcome.records)?;
        manifest.rows_appended = rows_appended;
        manifest.complete_step("append");

        manifest.advance(RunStatus::Ranking);
        let changes = classify_period(&snapshot, period);
        let ranking = self.ranking.rank(&snapshot, &self.registry, period);
        manifest.complete_step("rank");

        manifest.advance(RunStatus::Completed);
        let report = RunReport {
            run_id,
            period,
            manifest: manifest.clone(),
            resolution: outcome.summary(),
            revisions: outcome.revisions,
            conflicts: outcome.conflicts,
            rows_appended,
            store_records: history.len(),
            snapshot_digest: snapshot.digest(),
            snapshot: snapshot.to_records(),
            changes,
            ranks: ranking.entries,
            warnings: ranking.warnings,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================
