//! Local semantic document-search engine
//!
//! Ingests text-bearing files (single-URL downloads, flattened git
//! repositories, watched-directory events), chunks and embeds them, persists
//! the vectors in a vector-extended SQLite database, and serves
//! k-nearest-neighbor semantic queries with TF-IDF-driven query-refinement
//! recommendations. The MCP transport is an external collaborator: it wires
//! JSON schemas to [`tools::ToolHandler`] and optionally injects an
//! [`embedding::SamplingClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use local_search::{AppPaths, EngineConfig, SearchEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let paths = AppPaths::resolve()?;
//!     let _log_guard = local_search::logging::init_logging(&paths)?;
//!
//!     let engine = SearchEngine::new(EngineConfig::default(), paths, None)?;
//!     let response = engine
//!         .tools()
//!         .search_documents("connection pooling", None)
//!         .await;
//!     println!("{}", response.summary);
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod learning;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod reader;
pub mod recommend;
pub mod search;
pub mod store;
pub mod tools;
pub mod types;

// Re-export main types
pub use chunker::ContentChunker;
pub use config::{
    ChunkMethod, ChunkingConfig, EmbeddingConfig, EngineConfig, FetchConfig, JobsConfig,
    ReaderConfig, RecommendationConfig, SearchConfig,
};
pub use embedding::{
    cosine_similarity, select_backend, BackendKind, CohereBackend, EmbeddingBackend, LocalBackend,
    LocalDevice, OpenAiBackend, SamplingBackend, SamplingClient,
};
pub use engine::SearchEngine;
pub use error::{Result, SearchError};
pub use jobs::{Job, JobKind, JobManager, JobStatistics, JobStatus, ProgressEvent};
pub use learning::LearningAlgorithm;
pub use paths::AppPaths;
pub use pipeline::{FileFetchOptions, PipelineOrchestrator, WatchEvent};
pub use reader::FileReader;
pub use recommend::RecommendationEngine;
pub use search::{FileDetails, SearchHit, SearchOptions, SearchResponse, SearchService};
pub use store::{Database, RecommendationRepository, VectorRepository};
pub use tools::{ToolHandler, ToolResponse};
pub use types::{
    DocumentChunk, DocumentRecord, EffectivenessEvent, IndexStatistics, LearningParameters,
    Recommendation, RecommendationStrategy, ScoredChunk, StoredChunk,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
