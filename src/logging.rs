//! Line-JSON logging into the data root

use crate::paths::AppPaths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber writing line-JSON to
/// `<data>/local-search-mcp.log`
///
/// Returns the appender guard; dropping it flushes and stops the background
/// writer, so callers keep it alive for the process lifetime. Respects
/// `RUST_LOG`, defaulting to `info`.
pub fn init_logging(paths: &AppPaths) -> anyhow::Result<WorkerGuard> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_file())?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(guard)
}
