//! Local transformer embedding backend via fastembed

use crate::config::EmbeddingConfig;
use crate::embedding::{prepare_text, EmbeddingBackend};
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

/// Inference device for the local model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDevice {
    Cpu,
    Gpu,
}

/// Embedding backend running a fixed transformer model in-process
///
/// The model is loaded at most once; concurrent first calls all await the
/// same initialization. CPU inference uses small batches so the scheduler
/// gets control back often during heavy indexing.
pub struct LocalBackend {
    model_name: EmbeddingModel,
    dimension: usize,
    batch: usize,
    device: LocalDevice,
    model: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl LocalBackend {
    pub fn new(config: &EmbeddingConfig, device: LocalDevice) -> Result<Self> {
        let model_name = match config.local_model.as_deref() {
            Some(code) => EmbeddingModel::from_str(code)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?,
            None => EmbeddingModel::default(),
        };
        let info = EmbeddingModel::get_model_info(&model_name).ok_or_else(|| {
            EmbeddingError::InitFailed(format!("model metadata missing for {}", model_name))
        })?;
        let dimension = info.dim;

        let batch = match device {
            LocalDevice::Cpu => config.cpu_batch_size,
            LocalDevice::Gpu => config.gpu_batch_size,
        };

        Ok(Self {
            model_name,
            dimension,
            batch: batch.max(1),
            device,
            model: OnceCell::new(),
        })
    }

    /// Whether a GPU is usable on this host
    pub fn gpu_available() -> bool {
        std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    async fn model(&self) -> Result<&Arc<Mutex<TextEmbedding>>> {
        self.model
            .get_or_try_init(|| async {
                let model_name = self.model_name.clone();
                info!(model = %model_name, device = ?self.device, "Loading local embedding model");
                let model = tokio::task::spawn_blocking(move || {
                    let options =
                        TextInitOptions::new(model_name).with_show_download_progress(false);
                    TextEmbedding::try_new(options)
                })
                .await
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
                Ok::<_, crate::error::SearchError>(Arc::new(Mutex::new(model)))
            })
            .await
    }
}

#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn id(&self) -> &'static str {
        match self.device {
            LocalDevice::Cpu => "local-cpu",
            LocalDevice::Gpu => "local-gpu",
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prepared: Vec<String> = texts.iter().map(|t| prepare_text(t)).collect();

        let model = self.model().await?;
        let mut guard = model.lock().await;
        let vectors = guard
            .embed(prepared, None)
            .map_err(|e| EmbeddingError::InferenceFailed(e.to_string()))?;

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::InvalidDimension {
                    expected: self.dimension,
                    actual: vector.len(),
                }
                .into());
            }
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_gpu_detection_follows_env() {
        let saved = std::env::var("CUDA_VISIBLE_DEVICES").ok();

        std::env::remove_var("CUDA_VISIBLE_DEVICES");
        assert!(!LocalBackend::gpu_available());

        std::env::set_var("CUDA_VISIBLE_DEVICES", "0");
        assert!(LocalBackend::gpu_available());

        std::env::set_var("CUDA_VISIBLE_DEVICES", "");
        assert!(!LocalBackend::gpu_available());

        match saved {
            Some(v) => std::env::set_var("CUDA_VISIBLE_DEVICES", v),
            None => std::env::remove_var("CUDA_VISIBLE_DEVICES"),
        }
    }

    #[test]
    fn test_unknown_model_code_rejected() {
        let config = EmbeddingConfig {
            local_model: Some("definitely-not-a-model".to_string()),
            ..Default::default()
        };
        assert!(LocalBackend::new(&config, LocalDevice::Cpu).is_err());
    }

    #[test]
    fn test_batch_size_by_device() {
        let config = EmbeddingConfig::default();
        let cpu = LocalBackend::new(&config, LocalDevice::Cpu).unwrap();
        let gpu = LocalBackend::new(&config, LocalDevice::Gpu).unwrap();
        assert_eq!(cpu.batch_size(), 6);
        assert_eq!(gpu.batch_size(), 32);
        assert!(cpu.dimension() > 0);
    }
}
