// 🗺️ Scope Registry - Which region and division each state ranks within
//
// Static reference data (U.S. Census Bureau definitions):
//   Northeast → New England, Middle Atlantic
//   Midwest   → East North Central, West North Central
//   South     → South Atlantic, East South Central, West South Central
//   West      → Mountain, Pacific

use crate::records::EntityCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// STATE INFO
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateInfo {
    /// Canonical full name (title case)
    pub name: String,

    /// 2-letter USPS code - the entity identifier
    pub code: EntityCode,

    /// 2-digit zero-padded FIPS code
    pub fips: String,

    /// Census region; empty means "rank nationally only"
    pub region: String,

    /// Census division; empty means "rank nationally only"
    pub division: String,
}

impl StateInfo {
    pub fn new(name: &str, code: &str, fips: &str, region: &str, division: &str) -> Self {
        StateInfo {
            name: name.to_string(),
            code: EntityCode::new(code),
            fips: fips.to_string(),
            region: region.to_string(),
            division: division.to_string(),
        }
    }
}

// (name, usps, fips, region, division)
const US_STATES: [(&str, &str, &str, &str, &str); 50] = [
    ("Alabama", "AL", "01", "South", "East South Central"),
    ("Alaska", "AK", "02", "West", "Pacific"),
    ("Arizona", "AZ", "04", "West", "Mountain"),
    ("Arkansas", "AR", "05", "South", "West South Central"),
    ("California", "CA", "06", "West", "Pacific"),
    ("Colorado", "CO", "08", "West", "Mountain"),
    ("Connecticut", "CT", "09", "Northeast", "New England"),
    ("Delaware", "DE", "10", "South", "South Atlantic"),
    ("Florida", "FL", "12", "South", "South Atlantic"),
    ("Georgia", "GA", "13", "South", "South Atlantic"),
    ("Hawaii", "HI", "15", "West", "Pacific"),
    ("Idaho", "ID", "16", "West", "Mountain"),
    ("Illinois", "IL", "17", "Midwest", "East North Central"),
    ("Indiana", "IN", "18", "Midwest", "East North Central"),
    ("Iowa", "IA", "19", "Midwest", "West North Central"),
    ("Kansas", "KS", "20", "Midwest", "West North Central"),
    ("Kentucky", "KY", "21", "South", "East South Central"),
    ("Louisiana", "LA", "22", "South", "West South Central"),
    ("Maine", "ME", "23", "Northeast", "New England"),
    ("Maryland", "MD", "24", "South", "South Atlantic"),
    ("Massachusetts", "MA", "25", "Northeast", "New England"),
    ("Michigan", "MI", "26", "Midwest", "East North Central"),
    ("Minnesota", "MN", "27", "Midwest", "West North Central"),
    ("Mississippi", "MS", "28", "South", "East South Central"),
    ("Missouri", "MO", "29", "Midwest", "West North Central"),
    ("Montana", "MT", "30", "West", "Mountain"),
    ("Nebraska", "NE", "31", "Midwest", "West North Central"),
    ("Nevada", "NV", "32", "West", "Mountain"),
    ("New Hampshire", "NH", "33", "Northeast", "New England"),
    ("New Jersey", "NJ", "34", "Northeast", "Middle Atlantic"),
    ("New Mexico", "NM", "35", "West", "Mountain"),
    ("New York", "NY", "36", "Northeast", "Middle Atlantic"),
    ("North Carolina", "NC", "37", "South", "South Atlantic"),
    ("North Dakota", "ND", "38", "Midwest", "West North Central"),
    ("Ohio", "OH", "39", "Midwest", "East North Central"),
    ("Oklahoma", "OK", "40", "South", "West South Central"),
    ("Oregon", "OR", "41", "West", "Pacific"),
    ("Pennsylvania", "PA", "42", "Northeast", "Middle Atlantic"),
    ("Rhode Island", "RI", "44", "Northeast", "New England"),
    ("South Carolina", "SC", "45", "South", "South Atlantic"),
    ("South Dakota", "SD", "46", "Midwest", "West North Central"),
    ("Tennessee", "TN", "47", "South", "East South Central"),
    ("Texas", "TX", "48", "South", "West South Central"),
    ("Utah", "UT", "49", "West", "Mountain"),
    ("Vermont", "VT", "50", "Northeast", "New England"),
    ("Virginia", "VA", "51", "South", "South Atlantic"),
    ("Washington", "WA", "53", "West", "Pacific"),
    ("West Virginia", "WV", "54", "South", "South Atlantic"),
    ("Wisconsin", "WI", "55", "Midwest", "East North Central"),
    ("Wyoming", "WY", "56", "West", "Mountain"),
];

// ============================================================================
// SCOPE REGISTRY
// ============================================================================

/// Static entity → (region, division) assignment
#[derive(Debug, Clone)]
pub struct ScopeRegistry {
    states: Vec<StateInfo>,
    by_code: HashMap<EntityCode, usize>,
    by_name: HashMap<String, usize>,
}

impl ScopeRegistry {
    /// Registry of the 50 U.S. states
    pub fn new() -> Self {
        Self::from_entries(
            US_STATES
                .iter()
                .map(|(name, code, fips, region, division)| {
                    StateInfo::new(name, code, fips, region, division)
                })
                .collect(),
        )
    }

    /// Build from arbitrary entries; a repeated code keeps the first entry
    pub fn from_entries(entries: Vec<StateInfo>) -> Self {
        let mut registry = ScopeRegistry {
            states: Vec::with_capacity(entries.len()),
            by_code: HashMap::new(),
            by_name: HashMap::new(),
        };

        for info in entries {
            if registry.by_code.contains_key(&info.code) {
                continue;
            }
            let index = registry.states.len();
            registry.by_code.insert(info.code.clone(), index);
            registry.by_name.insert(info.name.to_lowercase(), index);
            registry.states.push(info);
        }

        registry
    }

    /// Look up by USPS code (case-insensitive)
    pub fn get(&self, code: &EntityCode) -> Option<&StateInfo> {
        self.by_code.get(code).map(|&i| &self.states[i])
    }

    pub fn get_by_code(&self, code: &str) -> Option<&StateInfo> {
        self.get(&EntityCode::new(code))
    }

    /// Look up by canonical name (case-insensitive, exact)
    pub fn get_by_name(&self, name: &str) -> Option<&StateInfo> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.states[i])
    }

    pub fn contains(&self, code: &EntityCode) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateInfo> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of registered states per region
    pub fn region_counts(&self) -> BTreeMap<String, usize> {
        count_by(self.states.iter().map(|s| s.region.as_str()))
    }

    /// Number of registered states per division
    pub fn division_counts(&self) -> BTreeMap<String, usize> {
        count_by(self.states.iter().map(|s| s.division.as_str()))
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn count_by<'a>(names: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for name in names.filter(|n| !n.is_empty()) {
        *counts.entry(name.to_string()).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================
