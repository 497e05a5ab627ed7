// 📚 Versioned Store - Append-only log of long records
//
// Exactly two operations: append one run's batch, read the whole history back.
// Corrections arrive as new rows under a later run id. Nothing is rewritten,
// nothing is deleted, and the log only grows.

use crate::records::{EntityCode, LongRecord, Period, RecordKey, RunId};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("batch for run {run} contains a record stamped with run {found}")]
    ForeignRunInBatch { run: RunId, found: RunId },

    #[error("batch for run {run} writes {entity} {period} more than once")]
    DuplicateKeyInBatch {
        run: RunId,
        entity: EntityCode,
        period: Period,
    },

    #[error("run {run} does not advance past the latest stored run {latest}")]
    RunNotAdvanced { run: RunId, latest: RunId },

    #[error("{path}: I/O error: {message}")]
    Io { path: String, message: String },

    #[error("{path} line {line}: parse error: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupted store: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Defects in the batch itself, as opposed to storage failures
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StoreError::ForeignRunInBatch { .. }
                | StoreError::DuplicateKeyInBatch { .. }
                | StoreError::RunNotAdvanced { .. }
        )
    }

    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// RECORD LOG
// ============================================================================

/// Ordered, append-only log of long records
pub trait RecordLog {
    /// Append one run's batch; either the whole batch lands or nothing does.
    /// Returns the number of records appended.
    fn append(&mut self, run: RunId, batch: &[LongRecord]) -> Result<usize, StoreError>;

    /// Every record ever appended, in append order
    fn read_all(&self) -> Result<Vec<LongRecord>, StoreError>;

    fn latest_run(&self) -> Result<Option<RunId>, StoreError> {
        Ok(self.read_all()?.iter().map(|r| r.run_id).max())
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self.read_all()?.len())
    }
}

/// Structural checks every backend runs before writing anything
pub fn check_batch(
    run: RunId,
    batch: &[LongRecord],
    latest: Option<RunId>,
) -> Result<(), StoreError> {
    if let Some(latest) = latest {
        if run <= latest {
            return Err(StoreError::RunNotAdvanced { run, latest });
        }
    }

    let mut seen: HashSet<RecordKey> = HashSet::with_capacity(batch.len());
    for record in batch {
        if record.run_id != run {
            return Err(StoreError::ForeignRunInBatch {
                run,
                found: record.run_id,
            });
        }
        if !seen.insert(record.key()) {
            return Err(StoreError::DuplicateKeyInBatch {
                run,
                entity: record.entity.clone(),
                period: record.period,
            });
        }
    }

    Ok(())
}

// ============================================================================
// MEMORY LOG
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Vec<LongRecord>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing history, in whatever order it was found
    pub fn with_records(records: Vec<LongRecord>) -> Self {
        MemoryLog { records }
    }
}

impl RecordLog for MemoryLog {
    fn append(&mut self, run: RunId, batch: &[LongRecord]) -> Result<usize, StoreError> {
        check_batch(run, batch, self.latest_run()?)?;
        self.records.extend_from_slice(batch);
        debug!(run = %run, appended = batch.len(), "memory log append");
        Ok(batch.len())
    }

    fn read_all(&self) -> Result<Vec<LongRecord>, StoreError> {
        Ok(self.records.clone())
    }
}

// ============================================================================
// JSONL LOG
// ============================================================================

/// One JSON record per line; appended, never rewritten
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn open(path: impl AsRef<Path>) -> Self {
        JsonlLog {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordLog for JsonlLog {
    fn append(&mut self, run: RunId, batch: &[LongRecord]) -> Result<usize, StoreError> {
        check_batch(run, batch, self.latest_run()?)?;
        if batch.is_empty() {
            return Ok(0);
        }

        // Serialize the whole batch before touching the file
        let mut buffer = String::new();
        for record in batch {
            let line =
                serde_json::to_string(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(buffer.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&self.path, e))?;

        info!(path = %self.path.display(), run = %run, appended = batch.len(), "appended to store");
        Ok(batch.len())
    }

    fn read_all(&self) -> Result<Vec<LongRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        if bytes.contains(&0) {
            return Err(StoreError::Corrupt(format!(
                "{}: contains NUL byte(s)",
                self.path.display()
            )));
        }
        if std::str::from_utf8(&bytes).is_err() {
            return Err(StoreError::Corrupt(format!(
                "{}: contains non-UTF-8 byte sequence(s)",
                self.path.display()
            )));
        }

        let mut records = Vec::new();
        for (index, line) in BufReader::new(bytes.as_slice()).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: LongRecord =
                serde_json::from_str(trimmed).map_err(|e| StoreError::Parse {
                    path: self.path.display().to_string(),
                    line: index + 1,
                    message: e.to_string(),
                })?;
            records.push(record);
        }

        Ok(records)
    }
}

// ============================================================================
// SQLITE LOG
// ============================================================================

pub struct SqliteLog {
    conn: Connection,
}

impl SqliteLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_schema(&conn)?;
        Ok(SqliteLog { conn })
    }
}

fn setup_schema(conn: &Connection) -> Result<(), StoreError> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Insertion id is the append order; rows are never updated
    conn.execute(
        "CREATE TABLE IF NOT EXISTS long_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity TEXT NOT NULL,
            period TEXT NOT NULL,
            value REAL NOT NULL,
            source_period TEXT NOT NULL,
            run_id TEXT NOT NULL,
            source TEXT NOT NULL,
            source_row INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_long_records_key ON long_records(entity, period)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_long_records_run ON long_records(run_id)",
        [],
    )?;

    Ok(())
}

type SqliteRow = (String, String, f64, String, String, String, i64);

fn row_to_record(row: SqliteRow) -> Result<LongRecord, StoreError> {
    let (entity, period, value, source_period, run_id, source, source_row) = row;
    let corrupt = |field: &str, raw: &str| {
        StoreError::Corrupt(format!("long_records: bad {} `{}`", field, raw))
    };

    Ok(LongRecord {
        entity: EntityCode::new(&entity),
        period: period.parse().map_err(|_| corrupt("period", &period))?,
        value,
        source_period: source_period
            .parse()
            .map_err(|_| corrupt("source_period", &source_period))?,
        run_id: run_id.parse().map_err(|_| corrupt("run_id", &run_id))?,
        source,
        source_row: usize::try_from(source_row)
            .map_err(|_| corrupt("source_row", &source_row.to_string()))?,
    })
}

impl RecordLog for SqliteLog {
    fn append(&mut self, run: RunId, batch: &[LongRecord]) -> Result<usize, StoreError> {
        check_batch(run, batch, self.latest_run()?)?;

        let tx = self.conn.transaction()?;
        for record in batch {
            tx.execute(
                "INSERT INTO long_records (
                    entity, period, value, source_period, run_id, source, source_row
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.entity.as_str(),
                    record.period.to_string(),
                    record.value,
                    record.source_period.to_string(),
                    record.run_id.to_string(),
                    record.source,
                    record.source_row as i64,
                ],
            )?;
        }
        tx.commit()?;

        info!(run = %run, appended = batch.len(), "appended to sqlite store");
        Ok(batch.len())
    }

    fn read_all(&self) -> Result<Vec<LongRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entity, period, value, source_period, run_id, source, source_row
             FROM long_records
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| -> rusqlite::Result<SqliteRow> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(row_to_record).collect()
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM long_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raw: &str) -> RunId {
        raw.parse().unwrap()
    }

    fn fact(code: &str, month: &str, value: f64, run_id: RunId) -> LongRecord {
        let period: Period = month.parse().unwrap();
        LongRecord {
            entity: EntityCode::new(code),
            period,
            value,
            source_period: period,
            run_id,
            source: "BLS".to_string(),
            source_row: 2,
        }
    }

    fn exercise_append_only(log: &mut dyn RecordLog) {
        let r1 = run("20260105_103000");
        let r2 = run("20260205_103000");

        let first = vec![fact("AL", "2025-12", 4.6, r1), fact("AK", "2025-12", 4.7, r1)];
        assert_eq!(log.append(r1, &first).unwrap(), 2);

        let second = vec![fact("AL", "2025-12", 4.5, r2)];
        assert_eq!(log.append(r2, &second).unwrap(), 1);

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], first[0]);
        assert_eq!(all[2], second[0]);
        assert_eq!(log.latest_run().unwrap(), Some(r2));
        assert_eq!(log.record_count().unwrap(), 3);
    }

    fn exercise_rejections(log: &mut dyn RecordLog) {
        let r1 = run("20260105_103000");
        let r0 = run("20251205_103000");
        let r2 = run("20260205_103000");

        log.append(r1, &[fact("AL", "2025-12", 4.6, r1)]).unwrap();

        // Replaying the same run id is rejected
        let err = log.append(r1, &[fact("AK", "2025-12", 4.7, r1)]).unwrap_err();
        assert!(matches!(err, StoreError::RunNotAdvanced { .. }));

        // So is an older one
        let err = log.append(r0, &[fact("AK", "2025-12", 4.7, r0)]).unwrap_err();
        assert!(matches!(err, StoreError::RunNotAdvanced { .. }));

        // Duplicate key inside one batch
        let dup = vec![fact("AK", "2025-12", 4.7, r2), fact("AK", "2025-12", 4.8, r2)];
        let err = log.append(r2, &dup).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKeyInBatch { .. }));
        assert!(err.is_structural());

        // Record stamped with another run
        let foreign = vec![fact("AK", "2025-12", 4.7, r1)];
        let err = log.append(r2, &foreign).unwrap_err();
        assert!(matches!(err, StoreError::ForeignRunInBatch { .. }));

        // Nothing from the rejected batches landed
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_log_append_only() {
        exercise_append_only(&mut MemoryLog::new());
    }

    #[test]
    fn test_memory_log_rejects_structural_defects() {
        exercise_rejections(&mut MemoryLog::new());
    }

    #[test]
    fn test_jsonl_log_append_only() {
        let dir = tempfile::tempdir().unwrap();
        exercise_append_only(&mut JsonlLog::open(dir.path().join("clean/clean_data.jsonl")));
    }

    #[test]
    fn test_jsonl_log_rejects_structural_defects() {
        let dir = tempfile::tempdir().unwrap();
        exercise_rejections(&mut JsonlLog::open(dir.path().join("clean_data.jsonl")));
    }

    #[test]
    fn test_sqlite_log_append_only() {
        exercise_append_only(&mut SqliteLog::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_log_rejects_structural_defects() {
        exercise_rejections(&mut SqliteLog::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let r1 = run("20260105_103000");

        {
            let mut log = SqliteLog::open(&path).unwrap();
            log.append(r1, &[fact("RI", "2025-11", 5.3, r1)]).unwrap();
        }

        let log = SqliteLog::open(&path).unwrap();
        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].run_id, r1);
        assert_eq!(all[0].value, 5.3);
    }

    #[test]
    fn test_jsonl_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlLog::open(dir.path().join("absent.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.latest_run().unwrap(), None);
    }

    #[test]
    fn test_jsonl_empty_batch_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean_data.jsonl");
        let mut log = JsonlLog::open(&path);

        assert_eq!(log.append(run("20260105_103000"), &[]).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_jsonl_skips_blank_lines_and_reports_parse_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean_data.jsonl");
        let r1 = run("20260105_103000");
        let good = serde_json::to_string(&fact("AL", "2025-12", 4.6, r1)).unwrap();

        fs::write(&path, format!("{}\n\n{}\n", good, good)).unwrap();
        assert_eq!(JsonlLog::open(&path).read_all().unwrap().len(), 2);

        fs::write(&path, format!("{}\n{{not json\n", good)).unwrap();
        match JsonlLog::open(&path).read_all() {
            Err(StoreError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_jsonl_rejects_nul_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean_data.jsonl");
        fs::write(&path, b"{\"entity\":\"AL\"}\n\0garbage").unwrap();

        match JsonlLog::open(&path).read_all() {
            Err(StoreError::Corrupt(message)) => assert!(message.contains("NUL")),
            other => panic!("expected corrupt store error, got {:?}", other),
        }
    }

    #[test]
    fn test_jsonl_rejects_non_utf8_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean_data.jsonl");
        fs::write(&path, b"\xff\xfe\n").unwrap();

        let mut log = JsonlLog::open(&path);
        match log.read_all() {
            Err(StoreError::Corrupt(message)) => assert!(message.contains("non-UTF-8")),
            other => panic!("expected corrupt store error, got {:?}", other),
        }
        // Appends are refused too; the file is left as found
        assert!(log.append(run("20260105_103000"), &[]).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"\xff\xfe\n");
    }
}
