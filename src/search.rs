//! Query path: embed, KNN, filter, and recommend
//!
//! Search APIs are best-effort: internal failures are logged and surface as
//! an empty result set rather than an error, per the tool contract.

use crate::config::SearchConfig;
use crate::embedding::EmbeddingBackend;
use crate::error::Result;
use crate::recommend::RecommendationEngine;
use crate::store::{RecommendationRepository, VectorRepository};
use crate::types::{DocumentRecord, Recommendation, ScoredChunk, StoredChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Options accepted by `search_documents`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_score: f32,
    pub include_metadata: bool,
    pub domain_filter: Option<String>,
    pub content_type_filter: Option<String>,
    pub language_filter: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.7,
            include_metadata: true,
            domain_filter: None,
            content_type_filter: None,
            language_filter: None,
        }
    }
}

impl SearchOptions {
    /// Fall back to engine-level defaults for unset numeric fields
    pub fn with_config_defaults(config: &SearchConfig) -> Self {
        Self {
            limit: config.limit,
            min_score: config.min_score,
            ..Default::default()
        }
    }
}

/// One ranked hit, embedding omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

/// Optional per-hit metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub chunk_offset: usize,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Response of `search_documents`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
}

/// Response of `get_file_details`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentRecord>,
    pub chunks: Vec<StoredChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_index: Option<usize>,
}

/// Semantic search service over the vector store
pub struct SearchService {
    embedder: Arc<dyn EmbeddingBackend>,
    vectors: Arc<VectorRepository>,
    recommendations: Arc<RecommendationRepository>,
    engine: RecommendationEngine,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        vectors: Arc<VectorRepository>,
        recommendations: Arc<RecommendationRepository>,
        engine: RecommendationEngine,
    ) -> Self {
        Self {
            embedder,
            vectors,
            recommendations,
            engine,
        }
    }

    /// Embed the query, run KNN, filter, and conditionally attach a
    /// refinement recommendation
    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResponse {
        let started = Instant::now();

        let query_embedding = match self.embedder.embed_query(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(query, "Query embedding failed: {}", e);
                return empty_response(started);
            }
        };

        let hits = match self
            .vectors
            .search_similar(&query_embedding, options.limit, options.min_score)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                error!(query, "KNN search failed: {}", e);
                return empty_response(started);
            }
        };

        let filtered: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| passes_filters(&hit.chunk.file_path, options))
            .collect();

        let recommendation = self.maybe_recommend(query, &filtered).await;

        let results: Vec<SearchHit> = filtered
            .into_iter()
            .map(|hit| to_hit(hit, options.include_metadata))
            .collect();

        SearchResponse {
            total: results.len(),
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
            recommendation,
        }
    }

    /// Chunks for one file, either the full set or a focused window around
    /// one chunk index
    pub async fn file_details(
        &self,
        file_path: &str,
        chunk_index: Option<usize>,
        context_size: usize,
    ) -> Result<FileDetails> {
        let document = self.vectors.get_document(file_path).await?;
        let chunks = match chunk_index {
            Some(index) => {
                let from = index.saturating_sub(context_size);
                let to = index.saturating_add(context_size);
                self.vectors.get_chunk_range(file_path, from, to).await?
            }
            None => self.vectors.get_file_chunks(file_path).await?,
        };

        Ok(FileDetails {
            file_path: file_path.to_string(),
            document,
            chunks,
            focus_index: chunk_index,
        })
    }

    /// Run the recommendation engine when the search outcome is weak
    async fn maybe_recommend(
        &self,
        query: &str,
        results: &[ScoredChunk],
    ) -> Option<Recommendation> {
        let threshold = match self.recommendations.load_parameters().await {
            Ok(parameters) => parameters.tfidf_threshold,
            Err(e) => {
                debug!("Could not load learning parameters: {}", e);
                return None;
            }
        };

        let mean_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32
        };
        let term_count = RecommendationEngine::term_count(query);
        if !RecommendationEngine::should_recommend(
            term_count,
            results.len(),
            mean_score,
            threshold,
        ) {
            return None;
        }

        let total_documents = match self.vectors.statistics().await {
            Ok(stats) => stats.total_files,
            Err(_) => 0,
        };

        match self
            .engine
            .recommend(query, results, total_documents, threshold)
            .await
        {
            Ok(recommendation) => recommendation,
            Err(e) => {
                debug!(query, "No recommendation produced: {}", e);
                None
            }
        }
    }
}

fn empty_response(started: Instant) -> SearchResponse {
    SearchResponse {
        results: Vec::new(),
        total: 0,
        elapsed_ms: started.elapsed().as_millis() as u64,
        recommendation: None,
    }
}

fn to_hit(hit: ScoredChunk, include_metadata: bool) -> SearchHit {
    let metadata = include_metadata.then(|| ChunkMetadata {
        chunk_offset: hit.chunk.chunk_offset,
        token_count: hit.chunk.token_count,
        created_at: hit.chunk.created_at,
    });
    SearchHit {
        chunk_id: hit.chunk.chunk_id,
        file_path: hit.chunk.file_path,
        chunk_index: hit.chunk.chunk_index,
        content: hit.chunk.content,
        score: hit.score,
        distance: hit.distance,
        metadata,
    }
}

fn passes_filters(file_path: &str, options: &SearchOptions) -> bool {
    if let Some(domain) = &options.domain_filter {
        if !file_path.contains(domain.as_str()) {
            return false;
        }
    }

    let extension = std::path::Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(content_type) = &options.content_type_filter {
        if content_type_of(&extension) != content_type.to_ascii_lowercase() {
            return false;
        }
    }

    if let Some(language) = &options.language_filter {
        if language_of(&extension) != language.to_ascii_lowercase() {
            return false;
        }
    }

    true
}

fn content_type_of(extension: &str) -> &'static str {
    match extension {
        "js" | "ts" | "py" | "java" | "c" | "cpp" | "h" => "code",
        "html" | "xml" | "md" | "rst" => "markup",
        "json" | "yaml" | "yml" | "csv" => "data",
        "css" | "scss" => "style",
        _ => "text",
    }
}

fn language_of(extension: &str) -> &'static str {
    match extension {
        "js" => "javascript",
        "ts" => "typescript",
        "py" => "python",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" => "cpp",
        "css" | "scss" => "css",
        "html" => "html",
        "xml" => "xml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "csv" => "csv",
        "md" => "markdown",
        "rst" => "restructuredtext",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options: SearchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.limit, 10);
        assert!((options.min_score - 0.7).abs() < f32::EPSILON);
        assert!(options.include_metadata);
    }

    #[test]
    fn test_options_camel_case() {
        let options: SearchOptions =
            serde_json::from_str(r#"{"minScore": 0.3, "domainFilter": "repositories"}"#).unwrap();
        assert!((options.min_score - 0.3).abs() < f32::EPSILON);
        assert_eq!(options.domain_filter.as_deref(), Some("repositories"));
    }

    #[test]
    fn test_filters() {
        let mut options = SearchOptions::default();
        options.domain_filter = Some("fetched".to_string());
        assert!(passes_filters("/docs/fetched/a.md", &options));
        assert!(!passes_filters("/docs/watched/a.md", &options));

        let mut options = SearchOptions::default();
        options.content_type_filter = Some("code".to_string());
        assert!(passes_filters("/x/main.py", &options));
        assert!(!passes_filters("/x/readme.md", &options));

        let mut options = SearchOptions::default();
        options.language_filter = Some("typescript".to_string());
        assert!(passes_filters("/x/app.ts", &options));
        assert!(!passes_filters("/x/app.js", &options));
    }

    #[test]
    fn test_language_and_content_type_maps() {
        assert_eq!(language_of("py"), "python");
        assert_eq!(language_of("weird"), "text");
        assert_eq!(content_type_of("yaml"), "data");
        assert_eq!(content_type_of("txt"), "text");
    }
}
