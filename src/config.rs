//! Configuration management for the search engine

use serde::{Deserialize, Serialize};

/// Main configuration for the search engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// File reading and classification settings
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Chunking settings
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding backend settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query-time settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Recommendation engine settings
    #[serde(default)]
    pub recommendation: RecommendationConfig,

    /// Fetch pipeline settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Job manager settings
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// File reading and classification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Size cap for ad-hoc reads in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Size cap for downloaded repo outputs in bytes
    #[serde(default = "default_max_repo_output_size")]
    pub max_repo_output_size: u64,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_repo_output_size() -> u64 {
    1024 * 1024 * 1024
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_repo_output_size: default_max_repo_output_size(),
        }
    }
}

/// Chunking method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMethod {
    /// Sliding window with boundary snapping
    Fixed,
    /// Split on sentence terminators
    Sentence,
    /// Split on blank lines
    Paragraph,
}

impl Default for ChunkMethod {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Chunking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,

    /// Segmentation method
    #[serde(default)]
    pub method: ChunkMethod,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            method: ChunkMethod::default(),
        }
    }
}

/// Embedding backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Local model code understood by fastembed; None picks the default model
    #[serde(default)]
    pub local_model: Option<String>,

    /// OpenAI embedding model
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Cohere embedding model
    #[serde(default = "default_cohere_model")]
    pub cohere_model: String,

    /// Embedding dimension (fixed vector width in the store)
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Batch size for CPU-only local inference
    #[serde(default = "default_cpu_batch_size")]
    pub cpu_batch_size: usize,

    /// Batch size for GPU-backed local inference
    #[serde(default = "default_gpu_batch_size")]
    pub gpu_batch_size: usize,

    /// Request timeout for embedding APIs in seconds
    #[serde(default = "default_api_timeout")]
    pub api_timeout: u64,
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_cohere_model() -> String {
    "embed-english-v3.0".to_string()
}

fn default_dimension() -> usize {
    512
}

fn default_cpu_batch_size() -> usize {
    6
}

fn default_gpu_batch_size() -> usize {
    32
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            local_model: None,
            openai_model: default_openai_model(),
            cohere_model: default_cohere_model(),
            dimension: default_dimension(),
            cpu_batch_size: default_cpu_batch_size(),
            gpu_batch_size: default_gpu_batch_size(),
            api_timeout: default_api_timeout(),
        }
    }
}

/// Query-time settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Default minimum similarity score
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_limit() -> usize {
    10
}

fn default_min_score() -> f32 {
    0.7
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_score: default_min_score(),
        }
    }
}

/// Recommendation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Maximum number of query terms accepted for analysis
    #[serde(default = "default_max_query_terms")]
    pub max_query_terms: usize,

    /// Number of top result chunks analyzed for TF-IDF
    #[serde(default = "default_analyzed_chunks")]
    pub analyzed_chunks: usize,

    /// Recommendation time-to-live in days
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_max_query_terms() -> usize {
    8
}

fn default_analyzed_chunks() -> usize {
    5
}

fn default_ttl_days() -> i64 {
    30
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            max_query_terms: default_max_query_terms(),
            analyzed_chunks: default_analyzed_chunks(),
            ttl_days: default_ttl_days(),
        }
    }
}

/// Fetch pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum download size in megabytes
    #[serde(default = "default_max_download_mb")]
    pub max_file_size_mb: u64,

    /// HTTP connection/read timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout: u64,

    /// Command used to flatten repositories to markdown
    #[serde(default = "default_repomix_command")]
    pub repomix_command: String,

    /// Command used for the clone fallback
    #[serde(default = "default_git_command")]
    pub git_command: String,
}

fn default_max_download_mb() -> u64 {
    1024
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_repomix_command() -> String {
    "repomix".to_string()
}

fn default_git_command() -> String {
    "git".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_download_mb(),
            timeout: default_fetch_timeout(),
            repomix_command: default_repomix_command(),
            git_command: default_git_command(),
        }
    }
}

/// Job manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Age in seconds after which terminal jobs become evictable
    #[serde(default = "default_job_max_age")]
    pub max_age_secs: u64,

    /// How long terminal subscription state lingers for late subscribers, in milliseconds
    #[serde(default = "default_terminal_linger_ms")]
    pub terminal_linger_ms: u64,
}

fn default_job_max_age() -> u64 {
    24 * 60 * 60
}

fn default_terminal_linger_ms() -> u64 {
    5000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_job_max_age(),
            terminal_linger_ms: default_terminal_linger_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(anyhow::anyhow!(
                "Chunk overlap must be smaller than chunk size"
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be greater than 0"
            ));
        }

        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err(anyhow::anyhow!(
                "Minimum score must be between 0.0 and 1.0"
            ));
        }

        if self.search.limit == 0 {
            return Err(anyhow::anyhow!("Search limit must be greater than 0"));
        }

        if self.recommendation.max_query_terms == 0 {
            return Err(anyhow::anyhow!(
                "Max query terms must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.embedding.dimension, 512);
        assert_eq!(config.search.limit, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.chunking.overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.search.min_score = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let tmp = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        std::fs::write(
            tmp.path(),
            "[chunking]\nchunk_size = 500\noverlap = 50\nmethod = \"sentence\"\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(tmp.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.method, ChunkMethod::Sentence);
        // Untouched sections keep defaults
        assert_eq!(config.search.limit, 10);
    }
}
