// 📈 Change Classification - Month-over-month delta per entity
//
// delta = round(current - previous, 1 decimal)
//   delta > 0  → increase
//   delta < 0  → decrease
//   delta == 0 → unchanged
// No previous month → NoComparison (never a zero delta)

use crate::records::{EntityCode, Period};
use crate::snapshot::ResolvedSnapshot;
use serde::{Deserialize, Serialize};

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
    Unchanged,
}

impl Direction {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Increase
        } else if delta < 0.0 {
            Direction::Decrease
        } else {
            Direction::Unchanged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
            Direction::Unchanged => "unchanged",
        }
    }
}

// ============================================================================
// CHANGE RESULT
// ============================================================================

/// Same shape for every direction; only `direction` and the sign of `delta` differ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub entity: EntityCode,
    pub period: Period,
    pub prior_period: Period,
    pub current_value: f64,
    pub prior_value: f64,

    /// Signed, rounded to one decimal place
    pub delta: f64,
    pub direction: Direction,
}

impl ChangeResult {
    /// Size of the change regardless of direction
    pub fn magnitude(&self) -> f64 {
        self.delta.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Compared(ChangeResult),
    NoComparison { entity: EntityCode, period: Period },
}

impl ChangeOutcome {
    pub fn entity(&self) -> &EntityCode {
        match self {
            ChangeOutcome::Compared(result) => &result.entity,
            ChangeOutcome::NoComparison { entity, .. } => entity,
        }
    }

    pub fn period(&self) -> Period {
        match self {
            ChangeOutcome::Compared(result) => result.period,
            ChangeOutcome::NoComparison { period, .. } => *period,
        }
    }

    pub fn result(&self) -> Option<&ChangeResult> {
        match self {
            ChangeOutcome::Compared(result) => Some(result),
            ChangeOutcome::NoComparison { .. } => None,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Round to one decimal place; negative zero collapses to zero
///
/// Rounds the exact binary value, so 0.15 (stored as 0.1499...) gives 0.1.
/// Exact ties go to the even digit.
pub fn round_delta(raw: f64) -> f64 {
    let rounded = format!("{:.1}", raw).parse::<f64>().unwrap_or(raw);
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub fn compare(
    entity: &EntityCode,
    period: Period,
    current_value: f64,
    prior_value: f64,
) -> ChangeResult {
    let delta = round_delta(current_value - prior_value);
    ChangeResult {
        entity: entity.clone(),
        period,
        prior_period: period.prev(),
        current_value,
        prior_value,
        delta,
        direction: Direction::from_delta(delta),
    }
}

/// Classify every entity that has a value for `period`, ordered by entity
pub fn classify_period(snapshot: &ResolvedSnapshot, period: Period) -> Vec<ChangeOutcome> {
    snapshot
        .records_for_period(period)
        .into_iter()
        .map(|record| classify_record(snapshot, &record.entity, period, record.value))
        .collect()
}

/// Classify every (entity, period) in the snapshot, ordered by (entity, period)
pub fn classify_all(snapshot: &ResolvedSnapshot) -> Vec<ChangeOutcome> {
    snapshot
        .records()
        .map(|record| classify_record(snapshot, &record.entity, record.period, record.value))
        .collect()
}

fn classify_record(
    snapshot: &ResolvedSnapshot,
    entity: &EntityCode,
    period: Period,
    current_value: f64,
) -> ChangeOutcome {
    match snapshot.value(entity, period.prev()) {
        Some(prior_value) => {
            ChangeOutcome::Compared(compare(entity, period, current_value, prior_value))
        }
        None => ChangeOutcome::NoComparison {
            entity: entity.clone(),
            period,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{LongRecord, RunId};
    use crate::snapshot::resolve_latest;

    fn period(raw: &str) -> Period {
        raw.parse().unwrap()
    }

    fn snapshot(facts: &[(&str, &str, f64)]) -> ResolvedSnapshot {
        let run: RunId = "20260105_103000".parse().unwrap();
        let history: Vec<LongRecord> = facts
            .iter()
            .map(|(code, month, value)| LongRecord {
                entity: EntityCode::new(code),
                period: period(month),
                value: *value,
                source_period: period(month),
                run_id: run,
                source: String::new(),
                source_row: 0,
            })
            .collect();
        resolve_latest(&history).unwrap()
    }

    #[test]
    fn test_unchanged() {
        let result = compare(&EntityCode::new("AL"), period("2025-12"), 4.0, 4.0);
        assert_eq!(result.delta, 0.0);
        assert_eq!(result.direction, Direction::Unchanged);
    }

    #[test]
    fn test_increase_rounds_to_one_decimal() {
        let result = compare(&EntityCode::new("RI"), period("2025-12"), 5.3, 4.0);
        assert_eq!(result.delta, 1.3);
        assert_eq!(result.direction, Direction::Increase);
        assert_eq!(result.prior_period, period("2025-11"));
    }

    #[test]
    fn test_decrease_reports_magnitude() {
        let result = compare(&EntityCode::new("AK"), period("2025-12"), 3.0, 4.0);
        assert_eq!(result.delta, -1.0);
        assert_eq!(result.magnitude(), 1.0);
        assert_eq!(result.direction, Direction::Decrease);
    }

    #[test]
    fn test_tiny_difference_rounds_to_unchanged() {
        let result = compare(&EntityCode::new("AK"), period("2025-12"), 4.02, 4.0);
        assert_eq!(result.delta, 0.0);
        assert!(result.delta.is_sign_positive());
        assert_eq!(result.direction, Direction::Unchanged);

        let result = compare(&EntityCode::new("AK"), period("2025-12"), 3.98, 4.0);
        assert!(result.delta.is_sign_positive());
        assert_eq!(result.direction, Direction::Unchanged);
    }

    #[test]
    fn test_missing_prior_is_no_comparison() {
        let snap = snapshot(&[("WY", "2025-12", 3.1), ("AL", "2025-12", 4.6), ("AL", "2025-11", 4.5)]);
        let outcomes = classify_period(&snap, period("2025-12"));

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].entity().as_str(), "AL");
        assert_eq!(outcomes[0].result().unwrap().delta, 0.1);
        assert_eq!(
            outcomes[1],
            ChangeOutcome::NoComparison {
                entity: EntityCode::new("WY"),
                period: period("2025-12"),
            }
        );
    }

    #[test]
    fn test_gap_month_is_not_consecutive() {
        let snap = snapshot(&[("AL", "2025-12", 4.6), ("AL", "2025-10", 4.2)]);
        let outcomes = classify_period(&snap, period("2025-12"));
        assert!(outcomes[0].result().is_none());
    }

    #[test]
    fn test_january_compares_with_december() {
        let snap = snapshot(&[("AL", "2026-01", 4.9), ("AL", "2025-12", 4.6)]);
        let outcomes = classify_period(&snap, period("2026-01"));
        let result = outcomes[0].result().unwrap();

        assert_eq!(result.prior_period, period("2025-12"));
        assert_eq!(result.delta, 0.3);
    }

    #[test]
    fn test_classify_all_covers_every_record() {
        let snap = snapshot(&[("AL", "2025-12", 4.6), ("AL", "2025-11", 4.5), ("AK", "2025-12", 4.7)]);
        let outcomes = classify_all(&snap);

        assert_eq!(outcomes.len(), 3);
        let compared = outcomes.iter().filter(|o| o.result().is_some()).count();
        assert_eq!(compared, 1);
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let compared = ChangeOutcome::Compared(compare(&EntityCode::new("RI"), period("2025-12"), 5.3, 4.0));
        let json = serde_json::to_value(&compared).unwrap();
        assert_eq!(json["outcome"], "compared");
        assert_eq!(json["direction"], "increase");

        let missing = ChangeOutcome::NoComparison {
            entity: EntityCode::new("WY"),
            period: period("2025-12"),
        };
        let json = serde_json::to_value(&missing).unwrap();
        assert_eq!(json["outcome"], "no_comparison");
        assert_eq!(json["period"], "2025-12-01");
    }

    #[test]
    fn test_rounding_uses_exact_binary_value() {
        let nv = EntityCode::new("NV");
        // 0.15 is stored just below 0.15
        assert_eq!(compare(&nv, period("2025-12"), 0.15, 0.0).delta, 0.1);
        // 4.65 - 4.5 lands just above 0.15
        assert_eq!(compare(&nv, period("2025-12"), 4.65, 4.5).delta, 0.2);
        assert_eq!(round_delta(-0.04), 0.0);
        assert!(round_delta(-0.04).is_sign_positive());
    }
}
