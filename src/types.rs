//! Type definitions shared across the indexing and search pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A chunk of a source document ready for embedding and storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Stable chunk identity: `<file_path>:<chunk_index>`
    pub chunk_id: String,
    /// Source file path
    pub file_path: String,
    /// Position of this chunk within the file, contiguous from 0
    pub chunk_index: usize,
    /// Chunk text
    pub content: String,
    /// Byte offset of the chunk start within the source text
    pub chunk_offset: usize,
    /// Estimated token count, always at least 1
    pub token_count: usize,
    /// Source file size in bytes
    pub file_size: u64,
    /// Source file modification time
    pub last_modified: DateTime<Utc>,
    /// Embedding vector; empty until the embedding stage runs
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn new(
        file_path: &str,
        chunk_index: usize,
        content: String,
        chunk_offset: usize,
        token_count: usize,
    ) -> Self {
        Self {
            chunk_id: format!("{}:{}", file_path, chunk_index),
            file_path: file_path.to_string(),
            chunk_index,
            content,
            chunk_offset,
            token_count,
            file_size: 0,
            last_modified: Utc::now(),
            embedding: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_file_metadata(mut self, file_size: u64, last_modified: DateTime<Utc>) -> Self {
        self.file_size = file_size;
        self.last_modified = last_modified;
        self
    }
}

/// A document row in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub file_path: String,
    pub file_name: String,
    pub last_modified: DateTime<Utc>,
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored chunk returned from queries, without its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub chunk_offset: usize,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A KNN hit: a stored chunk plus its distance and mapped score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: StoredChunk,
    /// Raw cosine distance from the vector extension, ascending is closer
    pub distance: f32,
    /// Similarity score, `1 - distance`
    pub score: f32,
}

/// Aggregate index statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_tokens: usize,
}

/// Query-refinement strategy chosen by the recommendation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStrategy {
    TermRemoval,
    TermRefinement,
    ContextualAddition,
}

impl RecommendationStrategy {
    pub const ALL: [RecommendationStrategy; 3] = [
        RecommendationStrategy::TermRemoval,
        RecommendationStrategy::TermRefinement,
        RecommendationStrategy::ContextualAddition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TermRemoval => "TERM_REMOVAL",
            Self::TermRefinement => "TERM_REFINEMENT",
            Self::ContextualAddition => "CONTEXTUAL_ADDITION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TERM_REMOVAL" => Some(Self::TermRemoval),
            "TERM_REFINEMENT" => Some(Self::TermRefinement),
            "CONTEXTUAL_ADDITION" => Some(Self::ContextualAddition),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecommendationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached query-refinement suggestion with a TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub query: String,
    pub suggested_terms: Vec<String>,
    pub strategy: RecommendationStrategy,
    pub tfidf_threshold: f32,
    pub confidence: f32,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub total_documents: usize,
    pub analyzed_documents: usize,
}

/// Feedback about whether a recommendation helped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivenessEvent {
    pub recommendation_id: Uuid,
    pub was_used: bool,
    pub improved_results: Option<bool>,
    pub usage_time: Option<DateTime<Utc>>,
    pub effectiveness_score: f32,
    pub original_result_count: usize,
    pub improved_result_count: Option<usize>,
}

/// Adaptive parameters for the recommendation engine, one persisted row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningParameters {
    pub tfidf_threshold: f32,
    pub effectiveness_history: Vec<f32>,
    pub strategy_weights: HashMap<RecommendationStrategy, f32>,
    pub learning_rate: f32,
    pub last_updated: DateTime<Utc>,
}

impl Default for LearningParameters {
    fn default() -> Self {
        let strategy_weights = RecommendationStrategy::ALL
            .into_iter()
            .map(|s| (s, 1.0))
            .collect();
        Self {
            tfidf_threshold: 0.25,
            effectiveness_history: Vec::new(),
            strategy_weights,
            learning_rate: 0.05,
            last_updated: Utc::now(),
        }
    }
}
