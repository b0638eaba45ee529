//! File reading, classification, and comment stripping

use crate::config::ReaderConfig;
use crate::error::{FileProcessingError, InputError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Supported document file extensions, a closed set
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "json", "yaml", "yml", "js", "ts", "py", "java", "c", "cpp", "h", "css",
    "scss", "html", "xml", "csv",
];

/// Comment families applied after reading, keyed by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentStyle {
    /// `//` and `/* ... */`
    CStyle,
    /// `#` to end of line
    Hash,
    /// `/* ... */` only; `//` has no comment meaning in plain CSS and
    /// appears inside `url(http://...)` values
    Css,
    /// `/* ... */` plus SCSS `//` line comments
    Scss,
    /// `<!-- ... -->`
    Markup,
    /// Canonicalize via parse + reserialize
    Json,
    /// Leave text untouched
    None,
}

/// A file read and classified for indexing
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub path: String,
    pub content: String,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Reads text-bearing files and strips language-appropriate comments
#[derive(Debug, Clone)]
pub struct FileReader {
    config: ReaderConfig,
}

impl FileReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Check whether the extension belongs to the supported set
    pub fn is_supported(path: &Path) -> bool {
        extension_of(path)
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Read a file under the ad-hoc size cap
    pub fn read(&self, path: &Path) -> Result<ProcessedFile> {
        self.read_with_limit(path, self.config.max_file_size)
    }

    /// Read a downloaded repo output under the larger size cap
    pub fn read_repo_output(&self, path: &Path) -> Result<ProcessedFile> {
        self.read_with_limit(path, self.config.max_repo_output_size)
    }

    fn read_with_limit(&self, path: &Path, limit: u64) -> Result<ProcessedFile> {
        let ext = extension_of(path)
            .ok_or_else(|| InputError::InvalidPath(path.display().to_string()))?;
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(InputError::Unsupported(format!(".{}", ext)).into());
        }

        let metadata = std::fs::metadata(path).map_err(|e| FileProcessingError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if metadata.len() > limit {
            return Err(InputError::TooLarge {
                size: metadata.len(),
                limit,
            }
            .into());
        }

        let bytes = std::fs::read(path).map_err(|e| FileProcessingError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        // Invalid UTF-8 is replaced rather than rejected
        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let content = strip_comments(&raw, style_for(&ext));

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        debug!(
            path = %path.display(),
            bytes = metadata.len(),
            "Read and classified file"
        );

        Ok(ProcessedFile {
            path: path.display().to_string(),
            content,
            file_size: metadata.len(),
            last_modified,
        })
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn style_for(ext: &str) -> CommentStyle {
    match ext {
        "js" | "ts" | "java" | "c" | "cpp" | "h" => CommentStyle::CStyle,
        "py" | "yaml" | "yml" => CommentStyle::Hash,
        "css" => CommentStyle::Css,
        "scss" => CommentStyle::Scss,
        "html" | "xml" => CommentStyle::Markup,
        "json" => CommentStyle::Json,
        _ => CommentStyle::None,
    }
}

fn block_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

fn line_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)//[^\n]*").unwrap())
}

fn hash_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)#[^\n]*").unwrap())
}

fn markup_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap())
}

fn strip_comments(text: &str, style: CommentStyle) -> String {
    match style {
        CommentStyle::CStyle => {
            let stripped = block_comment_re().replace_all(text, "");
            line_comment_re().replace_all(&stripped, "").into_owned()
        }
        CommentStyle::Hash => hash_comment_re().replace_all(text, "").into_owned(),
        CommentStyle::Css => block_comment_re().replace_all(text, "").into_owned(),
        CommentStyle::Scss => {
            let stripped = block_comment_re().replace_all(text, "");
            line_comment_re().replace_all(&stripped, "").into_owned()
        }
        CommentStyle::Markup => markup_comment_re().replace_all(text, "").into_owned(),
        CommentStyle::Json => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string())
            }
            Err(e) => {
                warn!("JSON canonicalization failed, keeping raw text: {}", e);
                text.to_string()
            }
        },
        CommentStyle::None => text.to_string(),
    }
}
