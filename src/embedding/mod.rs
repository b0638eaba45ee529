//! Embedding backend abstraction and selection
//!
//! Backends are polymorphic over document/query embedding plus a reported
//! dimension. Selection honors a pinned `EMBEDDING_BACKEND` first, then an
//! auto order of local-GPU, OpenAI, Cohere, local-CPU. The experimental
//! MCP-sampling backend is only ever used when pinned explicitly.

mod cohere;
mod local;
mod openai;
mod sampling;

pub use cohere::CohereBackend;
pub use local::{LocalBackend, LocalDevice};
pub use openai::OpenAiBackend;
pub use sampling::{SamplingBackend, SamplingClient};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable pinning a specific backend
pub const BACKEND_ENV: &str = "EMBEDDING_BACKEND";

/// Environment variable holding the OpenAI API key
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable holding the Cohere API key
pub const COHERE_KEY_ENV: &str = "COHERE_API_KEY";

/// Maximum characters of a single text sent to any backend
const MAX_TEXT_CHARS: usize = 2000;

/// Trait implemented by every embedding backend
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Stable identifier for logging and job metadata
    fn id(&self) -> &'static str;

    /// Fixed output vector width
    fn dimension(&self) -> usize;

    /// Preferred number of texts per call
    fn batch_size(&self) -> usize;

    /// Embed a batch of document texts, preserving order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::ApiFailed("empty embedding response".to_string()).into())
    }
}

/// Selectable backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    LocalGpu,
    LocalCpu,
    OpenAi,
    Cohere,
    McpSampling,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "local-gpu" => Ok(Self::LocalGpu),
            "local-cpu" => Ok(Self::LocalCpu),
            "openai" => Ok(Self::OpenAi),
            "cohere" => Ok(Self::Cohere),
            "mcp-sampling" => Ok(Self::McpSampling),
            other => Err(format!("unknown embedding backend: {}", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::LocalGpu => "local-gpu",
            Self::LocalCpu => "local-cpu",
            Self::OpenAi => "openai",
            Self::Cohere => "cohere",
            Self::McpSampling => "mcp-sampling",
        };
        f.write_str(name)
    }
}

/// Select an embedding backend from the environment and configuration
///
/// A valid pin that turns out to be unavailable logs a warning and falls
/// through to the auto order. The sampling client is only consulted when the
/// pin names `mcp-sampling`.
pub fn select_backend(
    config: &EmbeddingConfig,
    sampling: Option<Arc<dyn SamplingClient>>,
) -> Result<Arc<dyn EmbeddingBackend>> {
    if let Ok(pin) = std::env::var(BACKEND_ENV) {
        match pin.parse::<BackendKind>() {
            Ok(BackendKind::Auto) => {}
            Ok(kind) => match instantiate(kind, config, sampling.clone()) {
                Ok(backend) => {
                    info!(backend = backend.id(), "Using pinned embedding backend");
                    return Ok(backend);
                }
                Err(e) => {
                    warn!(
                        backend = %kind,
                        "Pinned embedding backend unavailable ({}), falling back to auto selection",
                        e
                    );
                }
            },
            Err(e) => warn!("Ignoring invalid {}: {}", BACKEND_ENV, e),
        }
    }

    let auto_order = [
        BackendKind::LocalGpu,
        BackendKind::OpenAi,
        BackendKind::Cohere,
        BackendKind::LocalCpu,
    ];
    for kind in auto_order {
        match instantiate(kind, config, None) {
            Ok(backend) => {
                info!(backend = backend.id(), "Selected embedding backend");
                return Ok(backend);
            }
            Err(e) => debug!(backend = %kind, "Backend not selectable: {}", e),
        }
    }

    Err(EmbeddingError::BackendUnavailable("no embedding backend available".to_string()).into())
}

fn instantiate(
    kind: BackendKind,
    config: &EmbeddingConfig,
    sampling: Option<Arc<dyn SamplingClient>>,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match kind {
        BackendKind::Auto => {
            Err(EmbeddingError::BackendUnavailable("auto is not a backend".to_string()).into())
        }
        BackendKind::LocalGpu => {
            if !LocalBackend::gpu_available() {
                return Err(EmbeddingError::BackendUnavailable(
                    "no GPU detected on this host".to_string(),
                )
                .into());
            }
            Ok(Arc::new(LocalBackend::new(config, LocalDevice::Gpu)?))
        }
        BackendKind::LocalCpu => Ok(Arc::new(LocalBackend::new(config, LocalDevice::Cpu)?)),
        BackendKind::OpenAi => {
            let api_key = std::env::var(OPENAI_KEY_ENV).map_err(|_| {
                EmbeddingError::BackendUnavailable(format!("{} not set", OPENAI_KEY_ENV))
            })?;
            Ok(Arc::new(OpenAiBackend::new(config, api_key, None)?))
        }
        BackendKind::Cohere => {
            let api_key = std::env::var(COHERE_KEY_ENV).map_err(|_| {
                EmbeddingError::BackendUnavailable(format!("{} not set", COHERE_KEY_ENV))
            })?;
            Ok(Arc::new(CohereBackend::new(config, api_key, None)?))
        }
        BackendKind::McpSampling => {
            let client = sampling.ok_or_else(|| {
                EmbeddingError::BackendUnavailable("no sampling client provided".to_string())
            })?;
            Ok(Arc::new(SamplingBackend::new(config, client)))
        }
    }
}

/// Normalize a text before embedding: trim, collapse whitespace runs, and
/// truncate long inputs with an ellipsis
pub fn prepare_text(text: &str) -> String {
    let mut prepared = String::with_capacity(text.len().min(MAX_TEXT_CHARS + 4));
    let mut last_was_space = false;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                prepared.push(' ');
            }
            last_was_space = true;
        } else {
            prepared.push(c);
            last_was_space = false;
        }
    }

    if prepared.chars().count() > MAX_TEXT_CHARS {
        prepared = prepared.chars().take(MAX_TEXT_CHARS).collect();
        prepared.push('…');
    }
    prepared
}

/// Embed a batch, retrying failed batches item by item
///
/// Returns one entry per input; items that still fail after the per-item
/// retry come back as `None` so callers can drop them. An all-`None` result
/// is reported as an error instead.
pub async fn embed_documents_resilient(
    backend: &dyn EmbeddingBackend,
    texts: &[String],
) -> Result<Vec<Option<Vec<f32>>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    match backend.embed_documents(texts).await {
        Ok(vectors) if vectors.len() == texts.len() => {
            return Ok(vectors.into_iter().map(Some).collect())
        }
        Ok(vectors) => {
            warn!(
                expected = texts.len(),
                got = vectors.len(),
                "Batch embedding returned wrong count, retrying per item"
            );
        }
        Err(e) => {
            warn!("Batch embedding failed ({}), retrying per item", e);
        }
    }

    let mut results = Vec::with_capacity(texts.len());
    let mut any_ok = false;
    for text in texts {
        match backend.embed_documents(std::slice::from_ref(text)).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                any_ok = true;
                results.push(Some(vectors.remove(0)));
            }
            Ok(_) => results.push(None),
            Err(e) => {
                debug!("Dropping item that failed to embed: {}", e);
                results.push(None);
            }
        }
    }

    if !any_ok {
        return Err(EmbeddingError::AllItemsFailed.into());
    }
    Ok(results)
}

/// Cosine similarity between two vectors
///
/// Defined for equal-length vectors; returns 0 when lengths differ or when
/// either norm is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyBackend {
        fail_batch: bool,
        fail_item: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        fn id(&self) -> &'static str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            4
        }

        fn batch_size(&self) -> usize {
            6
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail_batch && texts.len() > 1 {
                return Err(EmbeddingError::ApiFailed("batch".to_string()).into());
            }
            if let Some(bad) = self.fail_item {
                if texts.len() == 1 && texts[0].contains(&format!("item{}", bad)) {
                    return Err(EmbeddingError::ApiFailed("item".to_string()).into());
                }
            }
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("auto".parse::<BackendKind>().unwrap(), BackendKind::Auto);
        assert_eq!(
            "LOCAL-GPU".parse::<BackendKind>().unwrap(),
            BackendKind::LocalGpu
        );
        assert_eq!(
            "mcp-sampling".parse::<BackendKind>().unwrap(),
            BackendKind::McpSampling
        );
        assert!("bogus".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_prepare_text_collapses_whitespace() {
        assert_eq!(prepare_text("  hello \n\t world  "), "hello world");
    }

    #[test]
    fn test_prepare_text_truncates() {
        let long = "a".repeat(5000);
        let prepared = prepare_text(&long);
        assert_eq!(prepared.chars().count(), MAX_TEXT_CHARS + 1);
        assert!(prepared.ends_with('…'));
    }

    #[test]
    fn test_cosine_similarity() {
        let u = vec![1.0, 2.0, 3.0];
        let neg = vec![-1.0, -2.0, -3.0];
        let zero = vec![0.0, 0.0, 0.0];

        assert!((cosine_similarity(&u, &u) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&u, &neg) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&u, &zero), 0.0);
        assert_eq!(cosine_similarity(&u, &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_resilient_embedding_drops_failed_items() {
        let backend = FlakyBackend {
            fail_batch: true,
            fail_item: Some(1),
        };
        let texts = vec![
            "item0".to_string(),
            "item1".to_string(),
            "item2".to_string(),
        ];
        let results = embed_documents_resilient(&backend, &texts).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }

    #[tokio::test]
    async fn test_resilient_embedding_all_failed() {
        struct DeadBackend;

        #[async_trait]
        impl EmbeddingBackend for DeadBackend {
            fn id(&self) -> &'static str {
                "dead"
            }
            fn dimension(&self) -> usize {
                4
            }
            fn batch_size(&self) -> usize {
                2
            }
            async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(EmbeddingError::ApiFailed("down".to_string()).into())
            }
        }

        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_documents_resilient(&DeadBackend, &texts)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "embedding");
    }
}
