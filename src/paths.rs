//! Platform path resolution for data and document roots

use crate::error::{PathError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application directory name under the platform data root
const APP_DIR: &str = "local-search-mcp";

/// Database file name inside the data root
const DATABASE_FILE: &str = "local-search-index.db";

/// Log file name inside the data root
const LOG_FILE: &str = "local-search-mcp.log";

/// Environment variable overriding the data root
pub const DATA_FOLDER_ENV: &str = "MCP_DATA_FOLDER";

/// Environment variable overriding the docs root
pub const DOCS_FOLDER_ENV: &str = "MCP_DOCS_FOLDER";

/// Resolved application paths
///
/// The data root holds the database and log file; the docs root holds the
/// source and output directories for fetched content.
#[derive(Debug, Clone)]
pub struct AppPaths {
    data_root: PathBuf,
    docs_root: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the environment, falling back to platform defaults
    pub fn resolve() -> Result<Self> {
        let data_root = match std::env::var_os(DATA_FOLDER_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => platform_data_root()?,
        };
        let docs_root = match std::env::var_os(DOCS_FOLDER_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => data_root.join("docs"),
        };
        Ok(Self {
            data_root,
            docs_root,
        })
    }

    /// Build paths from explicit roots (used by tests and embedders)
    pub fn from_roots(data_root: impl Into<PathBuf>, docs_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            docs_root: docs_root.into(),
        }
    }

    /// Data root directory (database + logs)
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Docs root directory (inputs + outputs)
    pub fn docs_root(&self) -> &Path {
        &self.docs_root
    }

    /// SQLite database file path
    pub fn database_file(&self) -> PathBuf {
        self.data_root.join(DATABASE_FILE)
    }

    /// Append-only line-JSON log file path
    pub fn log_file(&self) -> PathBuf {
        self.data_root.join(LOG_FILE)
    }

    /// Directory for flattened repository output
    pub fn repositories_dir(&self) -> PathBuf {
        self.docs_root.join("repositories")
    }

    /// Directory for single-file downloads
    pub fn fetched_dir(&self) -> PathBuf {
        self.docs_root.join("fetched")
    }

    /// Directory observed by the external filesystem watcher
    pub fn watched_dir(&self) -> PathBuf {
        self.docs_root.join("watched")
    }

    /// Scratch directory for clone fallbacks and partial downloads
    pub fn temp_dir(&self) -> PathBuf {
        self.docs_root.join("temp")
    }

    /// Idempotently create every directory this layout needs
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.data_root.clone(),
            self.docs_root.clone(),
            self.repositories_dir(),
            self.fetched_dir(),
            self.watched_dir(),
            self.temp_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        debug!(
            data = %self.data_root.display(),
            docs = %self.docs_root.display(),
            "Application directories ready"
        );
        Ok(())
    }
}

/// Platform default data root: `~/.local/share` (Linux), `~/Library/Application
/// Support` (macOS), `%LOCALAPPDATA%` (Windows), each suffixed with the app dir
fn platform_data_root() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or(PathError::NoHome)?;
    Ok(base.join(APP_DIR))
}

fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(PathError::NotADirectory(path.display().to_string()).into());
        }
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
