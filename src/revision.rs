// 🔁 Revision Resolver - Wide reports → one long fact per (state, month)
//
// Every report restates the month before it. Reports are applied in ascending
// period order so a later report's restatement overwrites whatever an earlier
// report said about that month; chains of revisions settle in one pass.

use crate::records::{EntityCode, LongRecord, Period, RecordKey, RunId, WideRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// REVISION
// ============================================================================

/// A later report replaced an earlier value for the same (entity, period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub entity: EntityCode,
    pub period: Period,
    pub previous_value: f64,
    pub revised_value: f64,

    /// Reporting period of the wide row that carried the revision
    pub source_period: Period,
    pub source_row: usize,
}

/// Two different reports for the same entity and reporting period
///
/// Settled by input order (the later row wins); surfaced so callers can reject
/// the batch instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConflict {
    pub entity: EntityCode,
    pub period: Period,
    pub kept_value: f64,
    pub kept_row: usize,
    pub discarded_value: f64,
    pub discarded_row: usize,
}

// ============================================================================
// REVISION OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionOutcome {
    pub run_id: RunId,

    /// Conflict-free long facts, ordered by (entity, period)
    pub records: Vec<LongRecord>,

    /// Every overwrite that changed a value, in application order
    pub revisions: Vec<Revision>,

    /// Same entity and period reported twice with different figures
    pub conflicts: Vec<ReportConflict>,

    pub rows_received: usize,
    pub rows_publishable: usize,
    pub duplicates_dropped: usize,
}

impl RevisionOutcome {
    pub fn summary(&self) -> String {
        format!(
            "{} rows ({} publishable, {} duplicates dropped) → {} facts, {} revisions, {} conflicts",
            self.rows_received,
            self.rows_publishable,
            self.duplicates_dropped,
            self.records.len(),
            self.revisions.len(),
            self.conflicts.len()
        )
    }

    pub fn entities(&self) -> BTreeSet<EntityCode> {
        self.records.iter().map(|r| r.entity.clone()).collect()
    }

    /// Earliest and latest period covered by the resolved facts
    pub fn period_range(&self) -> Option<(Period, Period)> {
        let min = self.records.iter().map(|r| r.period).min()?;
        let max = self.records.iter().map(|r| r.period).max()?;
        Some((min, max))
    }
}

// ============================================================================
// REVISION RESOLVER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RevisionResolver;

impl RevisionResolver {
    pub fn new() -> Self {
        RevisionResolver
    }

    /// Resolve one run's wide rows into long facts stamped with `run_id`
    pub fn resolve(&self, rows: &[WideRecord], run_id: RunId) -> RevisionOutcome {
        let publishable: Vec<&WideRecord> = rows.iter().filter(|r| r.publishable).collect();
        info!(
            publishable = publishable.len(),
            total = rows.len(),
            "filtered to publishable rows"
        );

        let rows_publishable = publishable.len();
        let mut ordered = self.dedupe(publishable);
        let duplicates_dropped = rows_publishable - ordered.len();
        if duplicates_dropped > 0 {
            info!(duplicates_dropped, "dropped exact-duplicate rows before pivot");
        }

        // Stable: same-period rows keep input order, so the later row wins
        ordered.sort_by_key(|r| r.period);

        let mut reported: HashMap<RecordKey, &WideRecord> = HashMap::new();
        let mut winners: BTreeMap<RecordKey, LongRecord> = BTreeMap::new();
        let mut revisions = Vec::new();
        let mut conflicts = Vec::new();

        for row in ordered {
            let report_key = RecordKey::new(row.entity.clone(), row.period);
            if let Some(earlier) = reported.insert(report_key, row) {
                warn!(
                    entity = %row.entity,
                    period = %row.period.label(),
                    source_row = row.source_row,
                    earlier_row = earlier.source_row,
                    "conflicting reports for the same period; keeping the later row"
                );
                conflicts.push(ReportConflict {
                    entity: row.entity.clone(),
                    period: row.period,
                    kept_value: row.value,
                    kept_row: row.source_row,
                    discarded_value: earlier.value,
                    discarded_row: earlier.source_row,
                });
            }

            for fact in row.expand(run_id) {
                let key = fact.key();

                if let Some(current) = winners.get(&key) {
                    if current.value != fact.value {
                        info!(
                            entity = %key.entity,
                            period = %key.period.label(),
                            from = current.value,
                            to = fact.value,
                            source_row = fact.source_row,
                            "revision applied"
                        );
                        revisions.push(Revision {
                            entity: key.entity.clone(),
                            period: key.period,
                            previous_value: current.value,
                            revised_value: fact.value,
                            source_period: fact.source_period,
                            source_row: fact.source_row,
                        });
                    }
                }

                winners.insert(key, fact);
            }
        }

        let outcome = RevisionOutcome {
            run_id,
            records: winners.into_values().collect(),
            revisions,
            conflicts,
            rows_received: rows.len(),
            rows_publishable,
            duplicates_dropped,
        };
        info!("{}", outcome.summary());
        outcome
    }

    /// Drop exact duplicates, keeping the first occurrence
    pub fn dedupe<'a>(&self, rows: Vec<&'a WideRecord>) -> Vec<&'a WideRecord> {
        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|row| {
                let fresh = seen.insert(row.fingerprint());
                if !fresh {
                    debug!(entity = %row.entity, period = %row.period.label(), "duplicate row");
                }
                fresh
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
