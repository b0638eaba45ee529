//! Cohere embedding backend

use crate::config::EmbeddingConfig;
use crate::embedding::{prepare_text, EmbeddingBackend};
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Maximum texts per Cohere embed call
const MAX_BATCH: usize = 96;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v1";

/// Embedding backend calling the Cohere embed API
pub struct CohereBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

/// Cohere API request for embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
    embedding_types: [&'a str; 1],
}

/// Cohere API response for embeddings
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: EmbedVectors,
}

#[derive(Debug, Deserialize)]
struct EmbedVectors {
    float: Vec<Vec<f32>>,
}

impl CohereBackend {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: String,
        base_url: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout))
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: config.cohere_model.clone(),
            dimension: config.dimension,
        })
    }

    async fn embed_batch(&self, batch: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            texts: batch,
            input_type,
            embedding_types: ["float"],
        };

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::ApiFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiFailed(format!(
                "Cohere returned {}: {}",
                status, body
            ))
            .into());
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ApiFailed(e.to_string()))?;

        if parsed.embeddings.float.len() != batch.len() {
            return Err(EmbeddingError::ApiFailed(format!(
                "Cohere returned {} embeddings for {} texts",
                parsed.embeddings.float.len(),
                batch.len()
            ))
            .into());
        }
        for vector in &parsed.embeddings.float {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::InvalidDimension {
                    expected: self.dimension,
                    actual: vector.len(),
                }
                .into());
            }
        }
        Ok(parsed.embeddings.float)
    }
}

#[async_trait]
impl EmbeddingBackend for CohereBackend {
    fn id(&self) -> &'static str {
        "cohere"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        MAX_BATCH
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prepared: Vec<String> = texts.iter().map(|t| prepare_text(t)).collect();

        let mut vectors = Vec::with_capacity(prepared.len());
        for batch in prepared.chunks(MAX_BATCH) {
            debug!(size = batch.len(), "Embedding batch via Cohere");
            vectors.extend(self.embed_batch(batch, "search_document").await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prepared = [prepare_text(text)];
        let mut vectors = self.embed_batch(&prepared, "search_query").await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::ApiFailed("empty embedding response".to_string()).into())
    }
}
