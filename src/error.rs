//! Error handling for the search engine

use thiserror::Error;

/// Result type alias for the search engine
pub type Result<T> = std::result::Result<T, SearchError>;

/// Main error type for the search engine
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("File processing error: {0}")]
    FileProcessing(#[from] FileProcessingError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors for invalid caller input
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported file extension: {0}")]
    Unsupported(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Malformed query: {0}")]
    MalformedQuery(String),
}

/// Errors raised while turning a file into chunks
#[derive(Error, Debug)]
pub enum FileProcessingError {
    #[error("Read failed for {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("File is empty after processing: {0}")]
    EmptyContent(String),

    #[error("Chunking produced no chunks for {0}")]
    NoChunks(String),
}

/// Errors related to embedding backends
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("API request failed: {0}")]
    ApiFailed(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("All items in the batch failed to embed")]
    AllItemsFailed,
}

/// Errors from the vector store and recommendation repository
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQL failure: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Vector extension failure: {0}")]
    VectorExtension(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Nothing stored: {0}")]
    NothingStored(String),
}

/// Errors from HTTP fetches and subprocess-driven downloads
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Timeout fetching {0}")]
    Timeout(String),

    #[error("External tool failed: {tool}: {reason}")]
    ToolFailed { tool: String, reason: String },
}

/// Errors resolving or creating on-disk directories
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: String, reason: String },

    #[error("Path exists but is not a directory: {0}")]
    NotADirectory(String),

    #[error("Could not resolve platform data directory")]
    NoHome,
}

/// Errors related to job lifecycle management
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Unknown job id: {0}")]
    UnknownJob(String),

    #[error("Invalid state transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Job {0} was cancelled")]
    Cancelled(String),
}

impl SearchError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Network(NetworkError::Timeout(_))
                | SearchError::Network(NetworkError::RequestFailed(_))
                | SearchError::Embedding(EmbeddingError::ApiFailed(_))
        )
    }

    /// Get error category for logging and job failure messages
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::Input(_) => "input",
            SearchError::FileProcessing(_) => "file_processing",
            SearchError::Embedding(_) => "embedding",
            SearchError::Storage(_) => "storage",
            SearchError::Network(_) => "network",
            SearchError::Path(_) => "path",
            SearchError::Job(_) => "job",
            SearchError::Config(_) => "config",
            SearchError::Io(_) => "io",
            SearchError::Serialization(_) => "serialization",
        }
    }
}
