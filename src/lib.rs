// State Rates - Core Library
// Monthly state reports → reconciled append-only history → rankings and changes

pub mod records;   // Domain types + wide CSV input
pub mod revision;  // Revision Resolver - wide → long
pub mod store;     // Versioned Store - append-only log backends
pub mod snapshot;  // Latest-Version Resolver
pub mod scopes;    // Region / division assignment
pub mod change;    // Month-over-month classification
pub mod ranking;   // Competition ranking per scope
pub mod config;
pub mod telemetry;
pub mod pipeline;

// Re-export commonly used types
pub use records::{
    EntityCode, Period, RunId, RecordKey,
    WideRecord, LongRecord,
    load_wide_rows, load_wide_csv, read_wide_csv,
    load_validated_json, read_validated_json,
};
pub use revision::{ReportConflict, Revision, RevisionOutcome, RevisionResolver};
pub use store::{
    RecordLog, MemoryLog, JsonlLog, SqliteLog, StoreError,
    check_batch,
};
pub use snapshot::{resolve_latest, ResolveError, ResolvedSnapshot};
pub use scopes::{ScopeRegistry, StateInfo};
pub use change::{
    ChangeOutcome, ChangeResult, Direction,
    classify_all, classify_period,
};
pub use ranking::{
    RankingEngine, RankingReport, RankEntry, RankWarning,
    RankBasis, RankDirection, Scope, competition_ranks,
};
pub use config::{PipelineConfig, StoreBackend, ConfigError};
pub use pipeline::{Pipeline, PipelineError, RunManifest, RunReport, RunStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
