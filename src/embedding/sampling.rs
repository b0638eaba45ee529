//! Experimental embedding backend backed by host-LLM sampling
//!
//! Never chosen by auto-selection; only used when pinned explicitly. The MCP
//! transport injects a [`SamplingClient`] so this crate stays free of wire
//! concerns.

use crate::config::EmbeddingConfig;
use crate::embedding::{prepare_text, EmbeddingBackend};
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Host-provided sampling capability
#[async_trait]
pub trait SamplingClient: Send + Sync {
    /// Ask the host LLM to complete a prompt and return the raw text
    async fn sample(&self, prompt: &str) -> Result<String>;
}

/// Embedding backend asking the host LLM for one vector per text
pub struct SamplingBackend {
    client: Arc<dyn SamplingClient>,
    dimension: usize,
}

impl SamplingBackend {
    pub fn new(config: &EmbeddingConfig, client: Arc<dyn SamplingClient>) -> Self {
        Self {
            client,
            dimension: config.dimension,
        }
    }

    fn prompt_for(&self, text: &str) -> String {
        format!(
            "Produce a semantic embedding for the following text as a JSON array \
             of exactly {} floating point numbers. Respond with the array only, \
             no prose.\n\nText: {}",
            self.dimension, text
        )
    }

    fn parse_vector(&self, raw: &str) -> Result<Vec<f32>> {
        // Tolerate prose around the array by slicing to the outermost brackets
        let trimmed = raw.trim();
        let candidate = match (trimmed.find('['), trimmed.rfind(']')) {
            (Some(start), Some(end)) if end > start => &trimmed[start..=end],
            _ => trimmed,
        };

        let vector: Vec<f32> = serde_json::from_str(candidate)
            .map_err(|e| EmbeddingError::ApiFailed(format!("unparsable sampled vector: {}", e)))?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingBackend for SamplingBackend {
    fn id(&self) -> &'static str {
        "mcp-sampling"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        1
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let prepared = prepare_text(text);
            debug!(chars = prepared.len(), "Sampling embedding from host LLM");
            let raw = self.client.sample(&self.prompt_for(&prepared)).await?;
            vectors.push(self.parse_vector(&raw)?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSampler(String);

    #[async_trait]
    impl SamplingClient for FixedSampler {
        async fn sample(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn backend(response: &str, dimension: usize) -> SamplingBackend {
        let config = EmbeddingConfig {
            dimension,
            ..Default::default()
        };
        SamplingBackend::new(&config, Arc::new(FixedSampler(response.to_string())))
    }

    #[tokio::test]
    async fn test_parses_clean_array() {
        let b = backend("[0.1, 0.2, 0.3]", 3);
        let vectors = b.embed_documents(&["hi".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 3);
    }

    #[tokio::test]
    async fn test_parses_array_with_prose() {
        let b = backend("Sure! Here it is: [1.0, 2.0] Done.", 2);
        let vectors = b.embed_documents(&["hi".to_string()]).await.unwrap();
        assert_eq!(vectors[0], vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_wrong_length_rejected() {
        let b = backend("[1.0, 2.0, 3.0]", 512);
        let err = b.embed_documents(&["hi".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let b = backend("I cannot do that", 4);
        assert!(b.embed_documents(&["hi".to_string()]).await.is_err());
    }
}
