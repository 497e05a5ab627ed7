// ⏳ Latest-Version Resolver - Store history → one current fact per key
//
// Identity = (entity, period). Values = every record ever appended for it.
// The current value is the one written by the most recent run.

use crate::records::{EntityCode, LongRecord, Period, RecordKey, RunId};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("run {run} wrote {entity} {period} more than once")]
    DuplicateKeyInRun {
        entity: EntityCode,
        period: Period,
        run: RunId,
    },
}

// ============================================================================
// RESOLVED SNAPSHOT
// ============================================================================

/// Current fact per (entity, period); recomputed from the store, never persisted
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedSnapshot {
    records: BTreeMap<RecordKey, LongRecord>,

    /// Number of store rows this snapshot was resolved from
    history_len: usize,
}

impl ResolvedSnapshot {
    pub fn get(&self, entity: &EntityCode, period: Period) -> Option<&LongRecord> {
        self.records.get(&RecordKey::new(entity.clone(), period))
    }

    pub fn value(&self, entity: &EntityCode, period: Period) -> Option<f64> {
        self.get(entity, period).map(|r| r.value)
    }

    /// Most recent period any entity has a value for
    pub fn latest_period(&self) -> Option<Period> {
        self.records.keys().map(|k| k.period).max()
    }

    pub fn periods(&self) -> BTreeSet<Period> {
        self.records.keys().map(|k| k.period).collect()
    }

    pub fn entities(&self) -> BTreeSet<EntityCode> {
        self.records.keys().map(|k| k.entity.clone()).collect()
    }

    /// Records for one period, ordered by entity
    pub fn records_for_period(&self, period: Period) -> Vec<&LongRecord> {
        self.records.values().filter(|r| r.period == period).collect()
    }

    /// All current records, ordered by (entity, period)
    pub fn records(&self) -> impl Iterator<Item = &LongRecord> {
        self.records.values()
    }

    pub fn to_records(&self) -> Vec<LongRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// SHA-256 over the canonical (key-ordered) serialization
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for record in self.records.values() {
            // LongRecord serialization only fails on non-string map keys; it has none
            if let Ok(line) = serde_json::to_string(record) {
                hasher.update(line.as_bytes());
                hasher.update(b"\n");
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Reduce a full history to the latest record per (entity, period)
///
/// Order of `history` is irrelevant. The same key written twice under one run id
/// is a defect and is rejected rather than settled by position.
pub fn resolve_latest(history: &[LongRecord]) -> Result<ResolvedSnapshot, ResolveError> {
    let mut seen: HashSet<(RecordKey, RunId)> = HashSet::with_capacity(history.len());
    let mut current: BTreeMap<RecordKey, &LongRecord> = BTreeMap::new();

    for record in history {
        let key = record.key();

        if !seen.insert((key.clone(), record.run_id)) {
            return Err(ResolveError::DuplicateKeyInRun {
                entity: key.entity,
                period: key.period,
                run: record.run_id,
            });
        }

        let superseded = current
            .get(&key)
            .map_or(false, |existing| existing.run_id > record.run_id);
        if !superseded {
            current.insert(key, record);
        }
    }

    let snapshot = ResolvedSnapshot {
        records: current
            .into_iter()
            .map(|(key, record)| (key, record.clone()))
            .collect(),
        history_len: history.len(),
    };
    debug!(
        history = snapshot.history_len,
        current = snapshot.len(),
        "resolved latest versions"
    );
    Ok(snapshot)
}

// ============================================================================
// TESTS
// ============================================================================
