// 🧾 Records - Wide reports in, long facts out
//
// One WideRecord = one state's monthly report (current month + restated prior month)
// One LongRecord = one (state, month, value) fact, stamped with the run that produced it

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

// ============================================================================
// ENTITY CODE
// ============================================================================

/// Short entity identifier (USPS code for states), always upper-case
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityCode(String);

impl EntityCode {
    pub fn new(code: &str) -> Self {
        EntityCode(code.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityCode {
    fn from(code: String) -> Self {
        EntityCode::new(&code)
    }
}

impl From<&str> for EntityCode {
    fn from(code: &str) -> Self {
        EntityCode::new(code)
    }
}

impl From<EntityCode> for String {
    fn from(code: EntityCode) -> Self {
        code.0
    }
}

impl fmt::Display for EntityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PERIOD (canonical month)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized period `{0}` (expected YYYY-MM, YYYY/MM or YYYY-MM-01)")]
pub struct PeriodParseError(String);

/// A calendar month, held as the first day of that month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(NaiveDate);

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Period)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// Immediately preceding month (January wraps to December of the prior year)
    pub fn prev(&self) -> Period {
        Period(self.0 - Months::new(1))
    }

    pub fn next(&self) -> Period {
        Period(self.0 + Months::new(1))
    }

    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let invalid = || PeriodParseError(raw.to_string());

        // Full ISO date, day pinned to the 1st
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return if date.day() == 1 {
                Ok(Period(date))
            } else {
                Err(invalid())
            };
        }

        // YYYY-MM or YYYY/MM
        let (year, month) = raw
            .split_once(|c: char| c == '-' || c == '/')
            .ok_or_else(invalid)?;
        let digits = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_digit());
        if !digits(year, 4) || !digits(month, 2) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// ============================================================================
// RUN ID
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized run id `{0}` (expected RFC 3339 or YYYYMMDD_HHMMSS)")]
pub struct RunIdParseError(String);

/// Pipeline execution marker; later runs always compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(DateTime<Utc>);

impl RunId {
    pub fn now() -> Self {
        RunId(Utc::now())
    }

    pub fn from_datetime(timestamp: DateTime<Utc>) -> Self {
        RunId(timestamp)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    /// Compact `YYYYMMDD_HHMMSS` label used for run-scoped file names
    pub fn label(&self) -> String {
        self.0.format("%Y%m%d_%H%M%S").to_string()
    }
}

impl FromStr for RunId {
    type Err = RunIdParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();

        if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
            return Ok(RunId(timestamp.with_timezone(&Utc)));
        }

        NaiveDateTime::parse_from_str(raw, "%Y%m%d_%H%M%S")
            .map(|naive| RunId(Utc.from_utc_datetime(&naive)))
            .map_err(|_| RunIdParseError(raw.to_string()))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

// ============================================================================
// RECORD KEY
// ============================================================================

/// (entity, period) - the grouping key for every resolver
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub entity: EntityCode,
    pub period: Period,
}

impl RecordKey {
    pub fn new(entity: EntityCode, period: Period) -> Self {
        RecordKey { entity, period }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity, self.period.label())
    }
}

// ============================================================================
// WIDE RECORD (input)
// ============================================================================

/// One validated report row: current-month value plus an optional restatement
/// of the immediately preceding month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRecord {
    pub entity: EntityCode,

    /// Display name carried through from the source sheet
    pub entity_name: String,

    /// Reporting period of this row
    pub period: Period,

    /// Value for `period`
    pub value: f64,

    /// Restated value for `period.prev()`, when the report carries one
    pub prior_value: Option<f64>,

    /// Set by the upstream validation stage; trusted as-is
    pub publishable: bool,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    pub source: String,

    /// 1-based row number in the source sheet
    pub source_row: usize,
}

impl WideRecord {
    pub fn new(entity: &str, period: Period, value: f64, prior_value: Option<f64>) -> Self {
        let entity = EntityCode::new(entity);
        WideRecord {
            entity_name: entity.to_string(),
            entity,
            period,
            value,
            prior_value,
            publishable: true,
            source: String::new(),
            source_row: 0,
        }
    }

    pub fn with_provenance(mut self, source: &str, source_row: usize) -> Self {
        self.source = source.to_string();
        self.source_row = source_row;
        self
    }

    pub fn with_publishable(mut self, publishable: bool) -> Self {
        self.publishable = publishable;
        self
    }

    /// Exact-duplicate fingerprint over (entity, period, value, prior value)
    ///
    /// Provenance is left out: the same fact on two sheet rows is one fact.
    pub fn fingerprint(&self) -> String {
        let prior = self
            .prior_value
            .map(|v| format!("{:016x}", v.to_bits()))
            .unwrap_or_else(|| "-".to_string());

        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{:016x}|{}",
            self.entity,
            self.period,
            self.value.to_bits(),
            prior
        ));
        format!("{:x}", hasher.finalize())
    }

    /// Pivot into one or two long facts stamped with `run_id`
    pub fn expand(&self, run_id: RunId) -> Vec<LongRecord> {
        let mut facts = vec![self.fact(self.period, self.value, run_id)];

        if let Some(prior) = self.prior_value {
            facts.push(self.fact(self.period.prev(), prior, run_id));
        }

        facts
    }

    fn fact(&self, period: Period, value: f64, run_id: RunId) -> LongRecord {
        LongRecord {
            entity: self.entity.clone(),
            period,
            value,
            source_period: self.period,
            run_id,
            source: self.source.clone(),
            source_row: self.source_row,
        }
    }
}

// ============================================================================
// LONG RECORD (stored)
// ============================================================================

/// One (entity, period, value) fact - the unit appended to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRecord {
    pub entity: EntityCode,
    pub period: Period,
    pub value: f64,

    /// Reporting period of the wide row this fact came from
    pub source_period: Period,

    /// Run that produced (and appended) this fact
    pub run_id: RunId,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub source_row: usize,
}

impl LongRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.entity.clone(), self.period)
    }

    /// True when this fact restates an earlier month rather than reporting its own
    pub fn is_restatement(&self) -> bool {
        self.period != self.source_period
    }
}

// ============================================================================
// WIDE CSV INPUT
// ============================================================================

/// One validated row as the validation stage hands it over,
/// either as a CSV record or as an element of the validated-rows JSON array
#[derive(Debug, Deserialize)]
struct ValidatedRow {
    #[serde(rename = "state_code")]
    entity: String,

    #[serde(rename = "state_canonical", default)]
    entity_name: String,

    #[serde(rename = "month_canonical")]
    period: String,

    #[serde(rename = "unemployment_rate")]
    value: Option<f64>,

    #[serde(rename = "unemployment_rate_prev_month", default)]
    prior_value: Option<f64>,

    #[serde(rename = "is_publishable", deserialize_with = "flexible_bool")]
    publishable: bool,

    #[serde(default)]
    source: String,

    #[serde(rename = "source_row_index", default)]
    source_row: usize,
}

impl ValidatedRow {
    /// `Ok(None)` for an unpublishable row without a value
    fn into_wide(self, location: &str) -> Result<Option<WideRecord>> {
        let period: Period = self
            .period
            .parse()
            .with_context(|| format!("Bad period on {}", location))?;

        let value = match (self.value, self.publishable) {
            (Some(value), _) => value,
            (None, false) => {
                debug!(location, entity = %self.entity, "skipping unpublishable row without a value");
                return Ok(None);
            }
            (None, true) => bail!(
                "{}: publishable row for {} has no current value",
                location,
                self.entity
            ),
        };

        let entity = EntityCode::new(&self.entity);
        let entity_name = if self.entity_name.trim().is_empty() {
            entity.to_string()
        } else {
            self.entity_name.trim().to_string()
        };

        Ok(Some(WideRecord {
            entity,
            entity_name,
            period,
            value,
            prior_value: self.prior_value,
            publishable: self.publishable,
            source: self.source,
            source_row: self.source_row,
        }))
    }
}

/// JSON `true`/`false`, or the spellings spreadsheets and CSV exports use
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bool(flag) => Ok(flag),
        Raw::Int(1) => Ok(true),
        Raw::Int(0) => Ok(false),
        Raw::Int(other) => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {}",
            other
        ))),
        Raw::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(serde::de::Error::custom(format!(
                "expected a boolean, got `{}`",
                text
            ))),
        },
    }
}

/// Load validated wide rows, picking the format from the extension
///
/// `.json` is the validated-rows array or the validate manifest pointing at it;
/// anything else is read as CSV.
pub fn load_wide_rows(path: &Path) -> Result<Vec<WideRecord>> {
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        load_validated_json(path)
    } else {
        load_wide_csv(path)
    }
}

/// Load validated wide rows from a CSV file
pub fn load_wide_csv(csv_path: &Path) -> Result<Vec<WideRecord>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open wide CSV {}", csv_path.display()))?;
    let records = read_wide_csv(file)?;
    info!(path = %csv_path.display(), rows = records.len(), "loaded wide rows");
    Ok(records)
}

/// Read validated wide rows from any CSV source
pub fn read_wide_csv<R: io::Read>(reader: R) -> Result<Vec<WideRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let location = format!("line {}", index + 2); // header is line 1
        let row: ValidatedRow =
            result.with_context(|| format!("Failed to deserialize wide row on {}", location))?;
        if let Some(record) = row.into_wide(&location)? {
            records.push(record);
        }
    }

    Ok(records)
}

/// Load the validation stage's JSON handoff
///
/// Accepts the validated-rows array itself, or the validate manifest
/// (`{"rows_file": ...}`), in which case the rows file it names is read.
pub fn load_validated_json(path: &Path) -> Result<Vec<WideRecord>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let records = match document.get("rows_file").and_then(|v| v.as_str()) {
        Some(rows_file) => {
            let rows_path = Path::new(rows_file);
            debug!(manifest = %path.display(), rows = %rows_path.display(), "following validate manifest");
            let file = std::fs::File::open(rows_path)
                .with_context(|| format!("Failed to open rows file {}", rows_path.display()))?;
            read_validated_json(io::BufReader::new(file))?
        }
        None => validated_from_value(document)?,
    };

    info!(path = %path.display(), rows = records.len(), "loaded validated rows");
    Ok(records)
}

/// Read a validated-rows JSON array from any source
pub fn read_validated_json<R: io::Read>(reader: R) -> Result<Vec<WideRecord>> {
    let document: serde_json::Value =
        serde_json::from_reader(reader).context("Failed to parse validated rows JSON")?;
    validated_from_value(document)
}

fn validated_from_value(document: serde_json::Value) -> Result<Vec<WideRecord>> {
    let serde_json::Value::Array(items) = document else {
        bail!("validated rows JSON must be an array of rows or a manifest with `rows_file`");
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let location = format!("row {}", index + 1);
        let row: ValidatedRow = serde_json::from_value(item)
            .with_context(|| format!("Failed to deserialize validated {}", location))?;
        if let Some(record) = row.into_wide(&location)? {
            records.push(record);
        }
    }
    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn period(raw: &str) -> Period {
        raw.parse().unwrap()
    }

    #[test]
    fn test_period_parsing_forms() {
        assert_eq!(period("2025-12"), Period::new(2025, 12).unwrap());
        assert_eq!(period("2025/12"), Period::new(2025, 12).unwrap());
        assert_eq!(period("2025-12-01"), Period::new(2025, 12).unwrap());
        assert_eq!(period(" 2025-03 "), Period::new(2025, 3).unwrap());
    }

    #[test]
    fn test_period_rejects_garbage() {
        assert!("2025-12-15".parse::<Period>().is_err());
        assert!("2025-13".parse::<Period>().is_err());
        assert!("25-12".parse::<Period>().is_err());
        assert!("2025-1".parse::<Period>().is_err());
        assert!("December 2025".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_prev_wraps_january() {
        assert_eq!(period("2025-12").prev(), period("2025-11"));
        assert_eq!(period("2025-01").prev(), period("2024-12"));
        assert_eq!(period("2024-12").next(), period("2025-01"));
    }

    #[test]
    fn test_period_serializes_as_iso_first_of_month() {
        let json = serde_json::to_string(&period("2025-11")).unwrap();
        assert_eq!(json, "\"2025-11-01\"");

        let back: Period = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period("2025-11"));
        assert_eq!(back.label(), "2025-11");
    }

    #[test]
    fn test_run_id_parses_both_forms() {
        let compact: RunId = "20260105_103000".parse().unwrap();
        let rfc: RunId = "2026-01-05T10:30:00Z".parse().unwrap();
        assert_eq!(compact, rfc);
        assert_eq!(compact.label(), "20260105_103000");

        let later: RunId = "2026-01-05T10:30:01Z".parse().unwrap();
        assert!(later > rfc);
        assert!("yesterday".parse::<RunId>().is_err());
    }

    #[test]
    fn test_run_id_display_round_trips() {
        let run: RunId = "2026-01-05T10:30:00.250Z".parse().unwrap();
        let back: RunId = run.to_string().parse().unwrap();
        assert_eq!(run, back);
    }

    #[test]
    fn test_expand_with_prior_value() {
        let run: RunId = "20260105_103000".parse().unwrap();
        let row = WideRecord::new("al", period("2025-12"), 4.6, Some(4.5));

        let facts = row.expand(run);
        assert_eq!(facts.len(), 2);

        assert_eq!(facts[0].entity.as_str(), "AL");
        assert_eq!(facts[0].period, period("2025-12"));
        assert_eq!(facts[0].value, 4.6);
        assert!(!facts[0].is_restatement());

        assert_eq!(facts[1].period, period("2025-11"));
        assert_eq!(facts[1].value, 4.5);
        assert_eq!(facts[1].source_period, period("2025-12"));
        assert!(facts[1].is_restatement());
        assert!(facts.iter().all(|f| f.run_id == run));
    }

    #[test]
    fn test_expand_without_prior_value() {
        let run = RunId::now();
        let row = WideRecord::new("AL", period("2025-01"), 5.0, None);
        let facts = row.expand(run);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].period, period("2025-01"));
    }

    #[test]
    fn test_fingerprint_ignores_provenance() {
        let a = WideRecord::new("RI", period("2025-12"), 5.3, Some(5.3)).with_provenance("BLS", 2);
        let b = WideRecord::new("RI", period("2025-12"), 5.3, Some(5.3)).with_provenance("BLS", 9);
        let c = WideRecord::new("RI", period("2025-12"), 5.3, None);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_read_wide_csv() {
        let data = "\
state_canonical,state_code,month_canonical,unemployment_rate,unemployment_rate_prev_month,source,source_row_index,is_publishable
Rhode Island,RI,2025-12,5.3,5.3,BLS,2,true
Alabama,AL,2025-12,4.6,,BLS,3,true
Alaska,AK,2025-12,,,BLS,4,false
";
        let rows = read_wide_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entity_name, "Rhode Island");
        assert_eq!(rows[0].prior_value, Some(5.3));
        assert_eq!(rows[1].entity.as_str(), "AL");
        assert_eq!(rows[1].prior_value, None);
        assert_eq!(rows[1].source_row, 3);
    }

    #[test]
    fn test_read_wide_csv_rejects_publishable_row_without_value() {
        let data = "\
state_code,month_canonical,unemployment_rate,unemployment_rate_prev_month,is_publishable
RI,2025-12,,5.3,true
";
        assert!(read_wide_csv(data.as_bytes()).is_err());
    }

    #[test]
    fn test_read_wide_csv_accepts_spreadsheet_booleans() {
        let data = "\
state_code,month_canonical,unemployment_rate,unemployment_rate_prev_month,is_publishable
RI,2025-12,5.3,5.3,True
AL,2025-12,4.6,,1
AK,2025-12,4.7,,FALSE
";
        let rows = read_wide_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].publishable);
        assert!(rows[1].publishable);
        assert!(!rows[2].publishable);

        let bad = "state_code,month_canonical,unemployment_rate,is_publishable\nRI,2025-12,5.3,maybe\n";
        assert!(read_wide_csv(bad.as_bytes()).is_err());
    }

    const VALIDATED_ROWS: &str = r#"[
  {
    "state_canonical": "Rhode Island",
    "state_code": "RI",
    "month_canonical": "2025-12",
    "unemployment_rate": 5.3,
    "unemployment_rate_prev_month": 5.3,
    "source": "BLS",
    "source_row_index": 2,
    "qa_flags": [],
    "is_publishable": true
  },
  {
    "state_canonical": "Alaska",
    "state_code": "AK",
    "month_canonical": "2025-12",
    "unemployment_rate": null,
    "unemployment_rate_prev_month": null,
    "source": "BLS",
    "source_row_index": 3,
    "qa_flags": ["MISSING_RATE"],
    "is_publishable": false
  }
]"#;

    #[test]
    fn test_read_validated_json() {
        let rows = read_validated_json(VALIDATED_ROWS.as_bytes()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity.as_str(), "RI");
        assert_eq!(rows[0].entity_name, "Rhode Island");
        assert_eq!(rows[0].period, period("2025-12"));
        assert_eq!(rows[0].prior_value, Some(5.3));
        assert_eq!(rows[0].source_row, 2);
        assert!(rows[0].publishable);
    }

    #[test]
    fn test_read_validated_json_reports_row() {
        let data = r#"[{"state_code": "RI", "month_canonical": "2025-12", "unemployment_rate": null, "is_publishable": true}]"#;
        let err = read_validated_json(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 1"));

        assert!(read_validated_json(r#"{"rows": []}"#.as_bytes()).is_err());
    }

    #[test]
    fn test_load_wide_rows_follows_validate_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let rows_path = dir.path().join("validated_rows_2025-12_20260105_103000.json");
        std::fs::write(&rows_path, VALIDATED_ROWS).unwrap();

        let manifest_path = dir.path().join("validate_output.json");
        let manifest = serde_json::json!({
            "run_id": "20260105_103000",
            "latest_data_month": "2025-12",
            "rows_file": rows_path.display().to_string(),
        });
        std::fs::write(&manifest_path, manifest.to_string()).unwrap();

        let via_manifest = load_wide_rows(&manifest_path).unwrap();
        let direct = load_wide_rows(&rows_path).unwrap();

        assert_eq!(via_manifest, direct);
        assert_eq!(direct.len(), 1);
    }
}
