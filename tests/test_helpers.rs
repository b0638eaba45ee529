//! Test helpers and utilities for the local-search test suite
#![allow(dead_code)]

use async_trait::async_trait;
use local_search::{
    AppPaths, ChunkingConfig, DocumentChunk, EmbeddingBackend, EngineConfig, Result, SearchEngine,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic token-bucket embedding backend
///
/// Hashes each token into a bucket and L2-normalizes, so texts sharing words
/// land close in cosine space without any model download. Dimension and
/// batch size are small to exercise multi-batch paths.
pub struct HashedBackend {
    dimension: usize,
    batch: usize,
}

impl HashedBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch: 4,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_ascii_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        } else {
            // Zero vectors are rejected by cosine vec0 columns; give empty
            // text a stable direction instead
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashedBackend {
    fn id(&self) -> &'static str {
        "hashed-test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Engine wired against temp directories and the hashed backend
pub fn test_engine() -> (SearchEngine, TempDir) {
    test_engine_with_chunking(ChunkingConfig::default())
}

pub fn test_engine_with_chunking(chunking: ChunkingConfig) -> (SearchEngine, TempDir) {
    let tmp = TempDir::new().expect("temp dir");
    let paths = AppPaths::from_roots(tmp.path().join("data"), tmp.path().join("docs"));

    let config = EngineConfig {
        chunking,
        ..Default::default()
    };
    let engine = SearchEngine::with_backend(config, paths, Arc::new(HashedBackend::new(64)))
        .expect("engine");
    (engine, tmp)
}

/// Embed a single text through the same hashed backend the engine uses
pub async fn hashed_embedding(text: &str) -> Vec<f32> {
    HashedBackend::new(64)
        .embed_documents(&[text.to_string()])
        .await
        .expect("embedding")
        .remove(0)
}

/// Write a file under the engine's watched directory and return its path
pub fn write_watched_file(engine: &SearchEngine, name: &str, content: &str) -> std::path::PathBuf {
    let dir = engine.paths().watched_dir();
    std::fs::create_dir_all(&dir).expect("watched dir");
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write file");
    path
}

/// Index one file synchronously through the pipeline, panicking on failure
pub async fn index_file(engine: &SearchEngine, path: &std::path::Path) -> serde_json::Value {
    let job_id = engine.jobs().create(
        local_search::JobKind::WatchAdd,
        serde_json::json!({ "path": path.display().to_string() }),
    );
    let result = engine
        .pipeline()
        .process_file(&job_id, path, (0.0, 100.0), false)
        .await
        .expect("indexing failed");
    engine
        .jobs()
        .complete(&job_id, result.clone())
        .expect("job completion");
    result
}

/// Build a chunk with a ready embedding, for direct store tests
pub fn embedded_chunk(file: &str, index: usize, content: &str, dim: usize) -> DocumentChunk {
    let mut chunk = DocumentChunk::new(file, index, content.to_string(), index * 100, 1);
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    let seed = hasher.finish();
    chunk.embedding = (0..dim)
        .map(|i| ((seed.rotate_left(i as u32) % 1000) as f32 / 1000.0) + 0.001)
        .collect();
    chunk
}
