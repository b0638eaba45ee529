//! End-to-end indexing pipeline: fetch, chunk, embed, store
//!
//! Each public method drives a pre-created job through staged progress
//! windows and finalizes it as COMPLETED or FAILED. Control is yielded back
//! to the scheduler between embedding batches so the request loop stays
//! responsive during heavy indexing.

use crate::chunker::ContentChunker;
use crate::config::{ChunkingConfig, FetchConfig, ReaderConfig};
use crate::embedding::{embed_documents_resilient, EmbeddingBackend};
use crate::error::{
    EmbeddingError, FileProcessingError, InputError, JobError, NetworkError, Result, SearchError,
};
use crate::jobs::JobManager;
use crate::paths::AppPaths;
use crate::reader::FileReader;
use crate::store::VectorRepository;
use crate::types::DocumentChunk;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Filesystem events forwarded by the external watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEvent {
    Add,
    Change,
    Unlink,
}

/// Options for single-file downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileFetchOptions {
    /// Replace an existing file of the same name
    pub overwrite: bool,
    /// Index the file right after saving it
    pub index_after_save: bool,
    /// Per-request download cap override, in megabytes
    pub max_file_size_mb: Option<u64>,
}

impl Default for FileFetchOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            index_after_save: true,
            max_file_size_mb: None,
        }
    }
}

/// Orchestrates the fetch → chunk → embed → store pipeline
pub struct PipelineOrchestrator {
    reader: FileReader,
    chunker: ContentChunker,
    embedder: Arc<dyn EmbeddingBackend>,
    vectors: Arc<VectorRepository>,
    jobs: JobManager,
    paths: AppPaths,
    config: FetchConfig,
    http: reqwest::Client,
}

impl PipelineOrchestrator {
    pub fn new(
        reader_config: ReaderConfig,
        chunking_config: ChunkingConfig,
        fetch_config: FetchConfig,
        embedder: Arc<dyn EmbeddingBackend>,
        vectors: Arc<VectorRepository>,
        jobs: JobManager,
        paths: AppPaths,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(fetch_config.timeout))
            .timeout(Duration::from_secs(fetch_config.timeout.max(60) * 10))
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        Ok(Self {
            reader: FileReader::new(reader_config),
            chunker: ContentChunker::new(chunking_config),
            embedder,
            vectors,
            jobs,
            paths,
            config: fetch_config,
            http,
        })
    }

    /// Flatten a remote repository to markdown and index the result
    ///
    /// Progress windows: `[0,15]` prepare, `[15,30]` flatten, `[30,100]`
    /// index.
    pub async fn process_repo_fetch(&self, job_id: &str, repo_url: &str, branch: Option<&str>) {
        let outcome = self.run_repo_fetch(job_id, repo_url, branch).await;
        self.finalize(job_id, outcome);
    }

    /// Download a single file and optionally index it
    ///
    /// Progress windows: `[0,40]` download, `[40,100]` index.
    pub async fn process_file_fetch(
        &self,
        job_id: &str,
        url: &str,
        filename: &str,
        options: &FileFetchOptions,
    ) {
        let outcome = self.run_file_fetch(job_id, url, filename, options).await;
        self.finalize(job_id, outcome);
    }

    /// React to one watcher event: index on add/change, delete on unlink
    pub async fn process_watched_file(&self, job_id: &str, path: &Path, event: WatchEvent) {
        let outcome = match event {
            WatchEvent::Add | WatchEvent::Change => {
                self.process_file(job_id, path, (0.0, 100.0), false).await
            }
            WatchEvent::Unlink => self
                .vectors
                .delete_file(&path.display().to_string())
                .await
                .map(|removed| json!({ "filePath": path.display().to_string(), "removedChunks": removed })),
        };
        self.finalize(job_id, outcome);
    }

    /// Read, chunk, embed, and store one file within a progress window
    pub async fn process_file(
        &self,
        job_id: &str,
        path: &Path,
        window: (f32, f32),
        repo_output: bool,
    ) -> Result<serde_json::Value> {
        let (lo, hi) = window;
        let span = hi - lo;

        self.progress(job_id, lo, "reading file");
        let processed = if repo_output {
            self.reader.read_repo_output(path)?
        } else {
            self.reader.read(path)?
        };
        if processed.content.trim().is_empty() {
            return Err(FileProcessingError::EmptyContent(processed.path).into());
        }

        self.check_cancelled(job_id)?;
        self.progress(job_id, lo + span * 0.1, "chunking");
        let mut chunks = self.chunker.chunk(&processed.content, &processed.path);
        if chunks.is_empty() {
            return Err(FileProcessingError::NoChunks(processed.path).into());
        }
        for chunk in &mut chunks {
            chunk.file_size = processed.file_size;
            chunk.last_modified = processed.last_modified;
        }

        let embedded = self
            .embed_chunks(job_id, chunks, (lo + span * 0.2, lo + span * 0.9))
            .await?;
        let dropped_count = embedded.dropped;
        let chunks = embedded.chunks;

        let stored = self.vectors.store_chunks(&chunks).await?;
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        self.progress(job_id, hi, "stored");

        info!(
            file = %processed.path,
            chunks = stored,
            dropped = dropped_count,
            "Indexed file"
        );
        Ok(json!({
            "filePath": processed.path,
            "chunks": stored,
            "tokens": total_tokens,
            "droppedChunks": dropped_count,
        }))
    }

    /// Embed chunk contents in backend-sized batches, yielding between
    /// batches and dropping chunks whose embedding cannot be produced
    async fn embed_chunks(
        &self,
        job_id: &str,
        chunks: Vec<DocumentChunk>,
        window: (f32, f32),
    ) -> Result<EmbeddedChunks> {
        let (lo, hi) = window;
        let batch_size = self.embedder.batch_size().max(1);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let total_batches = texts.len().div_ceil(batch_size);

        let mut embeddings: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
            self.check_cancelled(job_id)?;

            match embed_documents_resilient(self.embedder.as_ref(), batch).await {
                Ok(batch_embeddings) => embeddings.extend(batch_embeddings),
                Err(SearchError::Embedding(EmbeddingError::AllItemsFailed)) => {
                    // A fully failed batch only fails the file if every
                    // other batch fails too
                    embeddings.extend(std::iter::repeat_with(|| None).take(batch.len()));
                }
                Err(other) => return Err(other),
            }

            let fraction = (batch_number + 1) as f32 / total_batches as f32;
            self.progress_with_meta(
                job_id,
                lo + (hi - lo) * fraction,
                "embedding",
                json!({ "batchesDone": batch_number + 1, "totalBatches": total_batches }),
            );
            // Hand the scheduler a turn so MCP requests stay responsive
            tokio::task::yield_now().await;
        }

        let mut kept: Vec<DocumentChunk> = Vec::with_capacity(chunks.len());
        let mut dropped = 0usize;
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            match embedding {
                Some(vector) => {
                    let mut chunk = chunk;
                    chunk.embedding = vector;
                    kept.push(chunk);
                }
                None => dropped += 1,
            }
        }

        if kept.is_empty() {
            return Err(EmbeddingError::AllItemsFailed.into());
        }
        if dropped > 0 {
            warn!(dropped, "Dropped chunks whose embedding failed");
            // Keep (file_path, chunk_index) contiguous from zero after drops
            for (index, chunk) in kept.iter_mut().enumerate() {
                chunk.chunk_index = index;
                chunk.chunk_id = format!("{}:{}", chunk.file_path, index);
            }
        }

        Ok(EmbeddedChunks {
            chunks: kept,
            dropped,
        })
    }

    async fn run_repo_fetch(
        &self,
        job_id: &str,
        repo_url: &str,
        branch: Option<&str>,
    ) -> Result<serde_json::Value> {
        let repo_name = repo_name_from_url(repo_url)?;
        self.progress(job_id, 5.0, "preparing output directory");
        let out_dir = self.paths.repositories_dir();
        tokio::fs::create_dir_all(&out_dir).await?;
        let out_file = out_dir.join(format!("{}.md", repo_name));
        self.progress(job_id, 15.0, "flattening repository");

        self.check_cancelled(job_id)?;
        let mut command = Command::new(&self.config.repomix_command);
        command
            .arg("--remote")
            .arg(repo_url)
            .arg("--output")
            .arg(&out_file)
            .arg("--style")
            .arg("markdown");
        if let Some(branch) = branch {
            command.arg("--remote-branch").arg(branch);
        }

        let output = command.output().await.map_err(|e| NetworkError::ToolFailed {
            tool: self.config.repomix_command.clone(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if is_auth_or_missing(&stderr) {
                warn!(repo_url, "Remote flatten failed, falling back to local clone");
                self.clone_and_flatten(repo_url, branch, &out_file).await?;
            } else {
                return Err(NetworkError::ToolFailed {
                    tool: self.config.repomix_command.clone(),
                    reason: stderr,
                }
                .into());
            }
        }

        self.progress(job_id, 30.0, "indexing flattened repository");
        let mut result = self
            .process_file(job_id, &out_file, (30.0, 100.0), true)
            .await?;
        if let Some(map) = result.as_object_mut() {
            map.insert("repoName".to_string(), json!(repo_name));
        }
        Ok(result)
    }

    /// Clone locally and flatten the working tree, then drop the clone
    async fn clone_and_flatten(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        out_file: &Path,
    ) -> Result<()> {
        let clone_dir = self
            .paths
            .temp_dir()
            .join(format!("clone-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&clone_dir).await?;

        let result = self
            .clone_and_flatten_inner(repo_url, branch, out_file, &clone_dir)
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&clone_dir).await {
            debug!(dir = %clone_dir.display(), "Could not remove clone dir: {}", e);
        }
        result
    }

    async fn clone_and_flatten_inner(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        out_file: &Path,
        clone_dir: &Path,
    ) -> Result<()> {
        let mut clone = Command::new(&self.config.git_command);
        clone.arg("clone").arg("--depth").arg("1");
        if let Some(branch) = branch {
            clone.arg("--branch").arg(branch);
        }
        clone.arg(repo_url).arg(clone_dir);

        let output = clone.output().await.map_err(|e| NetworkError::ToolFailed {
            tool: self.config.git_command.clone(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(NetworkError::ToolFailed {
                tool: self.config.git_command.clone(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }

        let output = Command::new(&self.config.repomix_command)
            .arg(clone_dir)
            .arg("--output")
            .arg(out_file)
            .arg("--style")
            .arg("markdown")
            .output()
            .await
            .map_err(|e| NetworkError::ToolFailed {
                tool: self.config.repomix_command.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(NetworkError::ToolFailed {
                tool: self.config.repomix_command.clone(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }
        Ok(())
    }

    async fn run_file_fetch(
        &self,
        job_id: &str,
        url: &str,
        filename: &str,
        options: &FileFetchOptions,
    ) -> Result<serde_json::Value> {
        let filename = sanitize_filename(filename)?;
        let dest = self.paths.fetched_dir().join(&filename);
        if dest.exists() && !options.overwrite {
            return Err(InputError::InvalidPath(format!(
                "{} already exists and overwrite is disabled",
                dest.display()
            ))
            .into());
        }

        let max_bytes = options
            .max_file_size_mb
            .unwrap_or(self.config.max_file_size_mb)
            .saturating_mul(1024 * 1024);

        self.progress(job_id, 2.0, "starting download");
        let bytes_written = self
            .download_to(job_id, url, &dest, max_bytes, (2.0, 40.0))
            .await?;
        self.progress(job_id, 40.0, "download complete");

        let mut result = json!({
            "filePath": dest.display().to_string(),
            "bytes": bytes_written,
            "indexed": options.index_after_save,
        });
        if options.index_after_save {
            let indexed = self
                .process_file(job_id, &dest, (40.0, 100.0), false)
                .await?;
            if let (Some(map), Some(indexed)) = (result.as_object_mut(), indexed.as_object()) {
                for (key, value) in indexed {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(result)
    }

    /// Stream a URL to disk, enforcing the size cap and writing atomically
    /// via a temp file rename
    async fn download_to(
        &self,
        job_id: &str,
        url: &str,
        dest: &Path,
        max_bytes: u64,
        window: (f32, f32),
    ) -> Result<u64> {
        use futures::StreamExt;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(NetworkError::RequestFailed)?;
        if !response.status().is_success() {
            return Err(NetworkError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            }
            .into());
        }

        let expected = response.content_length();
        if let Some(length) = expected {
            if length > max_bytes {
                return Err(InputError::TooLarge {
                    size: length,
                    limit: max_bytes,
                }
                .into());
            }
        }

        let temp_path = self
            .paths
            .temp_dir()
            .join(format!(".download-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(self.paths.temp_dir()).await?;
        let mut file = tokio::fs::File::create(&temp_path).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            if self.is_cancelled(job_id) {
                drop(file);
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(JobError::Cancelled(job_id.to_string()).into());
            }

            let piece = piece.map_err(NetworkError::RequestFailed)?;
            written += piece.len() as u64;
            if written > max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(InputError::TooLarge {
                    size: written,
                    limit: max_bytes,
                }
                .into());
            }
            file.write_all(&piece).await?;

            if let Some(total) = expected {
                let fraction = written as f32 / total.max(1) as f32;
                let (lo, hi) = window;
                self.progress_with_meta(
                    job_id,
                    lo + (hi - lo) * fraction,
                    "downloading",
                    json!({ "bytesWritten": written }),
                );
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&temp_path, dest).await?;
        debug!(url, bytes = written, dest = %dest.display(), "Downloaded file");
        Ok(written)
    }

    fn finalize(&self, job_id: &str, outcome: Result<serde_json::Value>) {
        match outcome {
            Ok(result) => {
                let _ = self.jobs.complete(job_id, result);
            }
            Err(e) => {
                warn!(job_id, category = e.category(), "Pipeline stage failed: {}", e);
                // A cancelled job is already terminal; failing it again is a
                // harmless no-op
                let _ = self.jobs.fail(job_id, &format!("{}: {}", e.category(), e));
            }
        }
    }

    fn progress(&self, job_id: &str, percent: f32, message: &str) {
        let _ = self
            .jobs
            .update_progress(job_id, percent, Some(message), None);
    }

    fn progress_with_meta(
        &self,
        job_id: &str,
        percent: f32,
        message: &str,
        meta: serde_json::Value,
    ) {
        let _ = self
            .jobs
            .update_progress(job_id, percent, Some(message), Some(meta));
    }

    fn is_cancelled(&self, job_id: &str) -> bool {
        self.jobs
            .cancellation_flag(job_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn check_cancelled(&self, job_id: &str) -> Result<()> {
        if self.is_cancelled(job_id) {
            return Err(JobError::Cancelled(job_id.to_string()).into());
        }
        Ok(())
    }
}

struct EmbeddedChunks {
    chunks: Vec<DocumentChunk>,
    dropped: usize,
}

/// Derive a directory-safe repository name from its URL
pub fn repo_name_from_url(repo_url: &str) -> Result<String> {
    let trimmed = repo_url.trim_end_matches('/');
    let last = trimmed
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InputError::InvalidPath(repo_url.to_string()))?;
    let name = last.trim_end_matches(".git");
    if name.is_empty() {
        return Err(InputError::InvalidPath(repo_url.to_string()).into());
    }
    Ok(name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
            c
        } else {
            '-'
        })
        .collect())
}

fn sanitize_filename(filename: &str) -> Result<PathBuf> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(InputError::InvalidPath(filename.to_string()).into());
    }
    Ok(PathBuf::from(filename))
}

fn is_auth_or_missing(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    ["authentication", "401", "403", "404", "not found", "could not read"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(
            repo_name_from_url("https://github.com/acme/widgets.git").unwrap(),
            "widgets"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/acme/widgets/").unwrap(),
            "widgets"
        );
        assert!(repo_name_from_url("https:///").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert!(sanitize_filename("notes.md").is_ok());
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("a/b.txt").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_auth_or_missing_markers() {
        assert!(is_auth_or_missing("remote: Authentication failed"));
        assert!(is_auth_or_missing("fatal: repository not found"));
        assert!(is_auth_or_missing("HTTP 404 returned"));
        assert!(!is_auth_or_missing("fatal: disk full"));
    }

    #[test]
    fn test_file_fetch_options_defaults() {
        let options: FileFetchOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.overwrite);
        assert!(options.index_after_save);
        assert!(options.max_file_size_mb.is_none());
    }
}
