// 📡 Telemetry - tracing subscriber setup for the binary

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Overrides the configured level, e.g. `STATE_RATES_LOG=state_rates=debug`
pub const LOG_ENV: &str = "STATE_RATES_LOG";

/// Install a stderr fmt subscriber. Stdout stays free for JSON output.
///
/// An unparseable `level` falls back to `info`. Calling twice is harmless.
pub fn init(level: &str) {
    let default_level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
