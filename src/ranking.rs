// 🏆 Ranking Engine - Competition ranks per scope ("1-1-3")
//
// Two metrics ranked independently for one period:
//   - the value itself
//   - |month-over-month delta| (size of the move, direction ignored)
// Each is ranked nationally, within the entity's region, and within its division.
// Tied entities share a rank and consume the slots after it.

use crate::change::{classify_period, ChangeOutcome};
use crate::records::{EntityCode, Period};
use crate::scopes::ScopeRegistry;
use crate::snapshot::ResolvedSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

// ============================================================================
// SCOPE / BASIS / DIRECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "name", rename_all = "lowercase")]
pub enum Scope {
    National,
    Region(String),
    Division(String),
}

impl Scope {
    pub fn level(&self) -> &'static str {
        match self {
            Scope::National => "national",
            Scope::Region(_) => "region",
            Scope::Division(_) => "division",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Scope::National => "national",
            Scope::Region(name) | Scope::Division(name) => name,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::National => f.write_str("national"),
            _ => write!(f, "{}:{}", self.level(), self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBasis {
    /// Raw value for the period
    Value,

    /// |delta| against the previous month
    AbsoluteChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankDirection {
    /// Rank 1 = highest
    #[default]
    Descending,

    /// Rank 1 = lowest
    Ascending,
}

// ============================================================================
// RANK ENTRY / REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub entity: EntityCode,
    pub period: Period,
    pub basis: RankBasis,
    pub scope: Scope,

    /// Metric value the rank was computed from
    pub metric: f64,
    pub rank: u32,

    /// Number of entities ranked in this scope
    pub scope_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RankWarning {
    /// Entity has data but no scope assignment; left out of every ranking
    Unassigned { entity: EntityCode },
}

impl fmt::Display for RankWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankWarning::Unassigned { entity } => {
                write!(f, "{} has no scope assignment; excluded from rankings", entity)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub period: Period,

    /// Ordered by (basis, scope, rank, entity)
    pub entries: Vec<RankEntry>,
    pub warnings: Vec<RankWarning>,
}

impl RankingReport {
    /// Every rank an entity holds, across scopes and bases
    pub fn ranks_for(&self, entity: &EntityCode) -> Vec<&RankEntry> {
        self.entries.iter().filter(|e| &e.entity == entity).collect()
    }

    pub fn rank_of(&self, entity: &EntityCode, basis: RankBasis, scope: &Scope) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| &e.entity == entity && e.basis == basis && &e.scope == scope)
            .map(|e| e.rank)
    }

    /// One scope's ranking for one basis, in rank order
    pub fn entries_for(&self, basis: RankBasis, scope: &Scope) -> Vec<&RankEntry> {
        self.entries
            .iter()
            .filter(|e| e.basis == basis && &e.scope == scope)
            .collect()
    }
}

// ============================================================================
// COMPETITION RANKING
// ============================================================================

/// Rank (entity, metric) pairs with competition ranking
///
/// Equal metrics share a rank; the next distinct metric's rank is its 1-based
/// position. Ties are listed by entity code.
pub fn competition_ranks(
    items: &[(EntityCode, f64)],
    direction: RankDirection,
) -> Vec<(EntityCode, f64, u32)> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        let by_metric = match direction {
            RankDirection::Descending => b.1.total_cmp(&a.1),
            RankDirection::Ascending => a.1.total_cmp(&b.1),
        };
        by_metric.then_with(|| a.0.cmp(&b.0))
    });

    let mut ranked = Vec::with_capacity(sorted.len());
    let mut rank = 0u32;
    for (position, (entity, metric)) in sorted.iter().enumerate() {
        if position == 0 || *metric != sorted[position - 1].1 {
            rank = position as u32 + 1;
        }
        ranked.push((entity.clone(), *metric, rank));
    }
    ranked
}

// ============================================================================
// RANKING ENGINE
// ============================================================================

pub struct RankingEngine {
    /// Which end of the metric is rank 1 (default: highest)
    pub direction: RankDirection,
}

impl RankingEngine {
    pub fn new() -> Self {
        RankingEngine {
            direction: RankDirection::Descending,
        }
    }

    pub fn with_direction(direction: RankDirection) -> Self {
        RankingEngine { direction }
    }

    /// Rank every entity with a value for `period`
    pub fn rank(
        &self,
        snapshot: &ResolvedSnapshot,
        registry: &ScopeRegistry,
        period: Period,
    ) -> RankingReport {
        let values: Vec<(EntityCode, f64)> = snapshot
            .records_for_period(period)
            .into_iter()
            .map(|r| (r.entity.clone(), r.value))
            .collect();

        let changes: Vec<(EntityCode, f64)> = classify_period(snapshot, period)
            .iter()
            .filter_map(ChangeOutcome::result)
            .map(|c| (c.entity.clone(), c.magnitude()))
            .collect();

        self.rank_metrics(registry, period, &values, &changes)
    }

    /// Rank precomputed metrics; entities missing from a list are simply not ranked on it
    pub fn rank_metrics(
        &self,
        registry: &ScopeRegistry,
        period: Period,
        values: &[(EntityCode, f64)],
        changes: &[(EntityCode, f64)],
    ) -> RankingReport {
        let unassigned: BTreeSet<EntityCode> = values
            .iter()
            .chain(changes.iter())
            .map(|(entity, _)| entity.clone())
            .filter(|entity| !registry.contains(entity))
            .collect();

        let warnings: Vec<RankWarning> = unassigned
            .iter()
            .map(|entity| {
                warn!(entity = %entity, period = %period.label(), "no scope assignment; excluded from rankings");
                RankWarning::Unassigned {
                    entity: entity.clone(),
                }
            })
            .collect();

        let mut entries = self.rank_basis(registry, period, RankBasis::Value, values);
        entries.extend(self.rank_basis(registry, period, RankBasis::AbsoluteChange, changes));
        entries.sort_by(|a, b| {
            (a.basis, &a.scope, a.rank, &a.entity).cmp(&(b.basis, &b.scope, b.rank, &b.entity))
        });

        info!(
            period = %period.label(),
            entries = entries.len(),
            excluded = warnings.len(),
            "rankings computed"
        );

        RankingReport {
            period,
            entries,
            warnings,
        }
    }

    fn rank_basis(
        &self,
        registry: &ScopeRegistry,
        period: Period,
        basis: RankBasis,
        items: &[(EntityCode, f64)],
    ) -> Vec<RankEntry> {
        let mut groups: BTreeMap<Scope, Vec<(EntityCode, f64)>> = BTreeMap::new();

        for (entity, metric) in items {
            let Some(info) = registry.get(entity) else {
                continue;
            };

            groups
                .entry(Scope::National)
                .or_default()
                .push((entity.clone(), *metric));

            // Empty region/division name → not ranked at that level
            if !info.region.is_empty() {
                groups
                    .entry(Scope::Region(info.region.clone()))
                    .or_default()
                    .push((entity.clone(), *metric));
            }
            if !info.division.is_empty() {
                groups
                    .entry(Scope::Division(info.division.clone()))
                    .or_default()
                    .push((entity.clone(), *metric));
            }
        }

        let mut entries = Vec::new();
        for (scope, members) in groups {
            let scope_size = members.len();
            for (entity, metric, rank) in competition_ranks(&members, self.direction) {
                entries.push(RankEntry {
                    entity,
                    period,
                    basis,
                    scope: scope.clone(),
                    metric,
                    rank,
                    scope_size,
                });
            }
        }
        entries
    }
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
