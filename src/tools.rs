//! MCP tool surface
//!
//! Each handler returns a textual summary plus a structured payload; the MCP
//! router owns transport and JSON-schema wiring and calls straight into this
//! type. Fetch tools return synchronously with a job id while the pipeline
//! runs in the background.

use crate::error::Result;
use crate::jobs::{JobKind, JobManager};
use crate::paths::AppPaths;
use crate::pipeline::{repo_name_from_url, FileFetchOptions, PipelineOrchestrator, WatchEvent};
use crate::search::{SearchOptions, SearchService};
use crate::store::{RecommendationRepository, VectorRepository};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long `flush_all` waits for cancelled pipelines to quiesce
const FLUSH_GRACE: Duration = Duration::from_millis(500);

/// A tool invocation result: human summary plus structured payload
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolResponse {
    pub summary: String,
    pub payload: serde_json::Value,
}

/// The tool surface invoked by the MCP router
pub struct ToolHandler {
    search: Arc<SearchService>,
    pipeline: Arc<PipelineOrchestrator>,
    jobs: JobManager,
    vectors: Arc<VectorRepository>,
    recommendations: Arc<RecommendationRepository>,
    paths: AppPaths,
}

impl ToolHandler {
    pub fn new(
        search: Arc<SearchService>,
        pipeline: Arc<PipelineOrchestrator>,
        jobs: JobManager,
        vectors: Arc<VectorRepository>,
        recommendations: Arc<RecommendationRepository>,
        paths: AppPaths,
    ) -> Self {
        Self {
            search,
            pipeline,
            jobs,
            vectors,
            recommendations,
            paths,
        }
    }

    /// Semantic search over the index
    pub async fn search_documents(
        &self,
        query: &str,
        options: Option<SearchOptions>,
    ) -> ToolResponse {
        let options = options.unwrap_or_default();
        let response = self.search.search(query, &options).await;

        let mut summary = format!(
            "Found {} chunks for \"{}\" in {} ms",
            response.total, query, response.elapsed_ms
        );
        if let Some(recommendation) = &response.recommendation {
            summary.push_str(&format!(
                "; suggestion ({}): try \"{}\"",
                recommendation.strategy,
                recommendation.suggested_terms.join(" ")
            ));
        }

        ToolResponse {
            summary,
            payload: serde_json::to_value(&response).unwrap_or_default(),
        }
    }

    /// Chunk-level detail for one indexed file
    pub async fn get_file_details(
        &self,
        file_path: &str,
        chunk_index: Option<usize>,
        context_size: Option<usize>,
    ) -> ToolResponse {
        match self
            .search
            .file_details(file_path, chunk_index, context_size.unwrap_or(3))
            .await
        {
            Ok(details) => ToolResponse {
                summary: format!("{} has {} chunks", file_path, details.chunks.len()),
                payload: serde_json::to_value(&details).unwrap_or_default(),
            },
            Err(e) => {
                warn!(file_path, "get_file_details failed: {}", e);
                ToolResponse {
                    summary: format!("Could not read details for {}: {}", file_path, e),
                    payload: json!({ "filePath": file_path, "chunks": [] }),
                }
            }
        }
    }

    /// Start a repository fetch job and return its id immediately
    pub fn fetch_repo(&self, repo_url: &str, branch: Option<String>) -> Result<ToolResponse> {
        let repo_name = repo_name_from_url(repo_url)?;
        let job_id = self.jobs.create(
            JobKind::FetchRepo,
            json!({ "repoUrl": repo_url, "branch": branch, "repoName": repo_name }),
        );

        let pipeline = Arc::clone(&self.pipeline);
        let url = repo_url.to_string();
        let id = job_id.clone();
        tokio::spawn(async move {
            pipeline
                .process_repo_fetch(&id, &url, branch.as_deref())
                .await;
        });

        Ok(ToolResponse {
            summary: format!("Fetching repository {} as job {}", repo_name, job_id),
            payload: json!({ "jobId": job_id, "repoName": repo_name }),
        })
    }

    /// Start a single-file download job and return its id immediately
    pub fn fetch_file(
        &self,
        url: &str,
        filename: &str,
        options: Option<FileFetchOptions>,
    ) -> Result<ToolResponse> {
        let options = options.unwrap_or_default();
        let job_id = self.jobs.create(
            JobKind::FetchFile,
            json!({ "url": url, "filename": filename }),
        );

        let pipeline = Arc::clone(&self.pipeline);
        let url = url.to_string();
        let filename_owned = filename.to_string();
        let id = job_id.clone();
        tokio::spawn(async move {
            pipeline
                .process_file_fetch(&id, &url, &filename_owned, &options)
                .await;
        });

        Ok(ToolResponse {
            summary: format!("Fetching {} as job {}", filename, job_id),
            payload: json!({ "jobId": job_id, "filename": filename }),
        })
    }

    /// Start a job for a watcher event (add/change index, unlink delete)
    pub fn handle_watch_event(&self, path: &Path, event: WatchEvent) -> ToolResponse {
        let kind = match event {
            WatchEvent::Add => JobKind::WatchAdd,
            WatchEvent::Change => JobKind::WatchChange,
            WatchEvent::Unlink => JobKind::WatchRemove,
        };
        let display = path.display().to_string();
        let job_id = self.jobs.create(kind, json!({ "path": display }));

        let pipeline = Arc::clone(&self.pipeline);
        let path = path.to_path_buf();
        let id = job_id.clone();
        tokio::spawn(async move {
            pipeline.process_watched_file(&id, &path, event).await;
        });

        ToolResponse {
            summary: format!("Watch event {:?} for {} as job {}", event, display, job_id),
            payload: json!({ "jobId": job_id }),
        }
    }

    /// Remove one file's document and chunks from the index
    pub async fn remove_file(&self, file_path: &str) -> Result<ToolResponse> {
        let removed = self.vectors.delete_file(file_path).await?;
        Ok(ToolResponse {
            summary: format!("Removed {} chunks for {}", removed, file_path),
            payload: json!({ "filePath": file_path, "removedChunks": removed }),
        })
    }

    /// Cancel running jobs, wait briefly for quiescence, then clear all
    /// indexed data and downloaded directories
    pub async fn flush_all(&self) -> Result<ToolResponse> {
        let active = self.jobs.list_active();
        for job in &active {
            let _ = self.jobs.cancel(&job.id);
        }
        if !active.is_empty() {
            // Cancellation is cooperative; give in-flight stages a chance to
            // observe the flag before the data under them disappears
            tokio::time::sleep(FLUSH_GRACE).await;
        }

        self.vectors.clear().await?;
        self.recommendations.clear().await?;

        for dir in [
            self.paths.repositories_dir(),
            self.paths.fetched_dir(),
            self.paths.temp_dir(),
        ] {
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
            tokio::fs::create_dir_all(&dir).await?;
        }

        info!(cancelled = active.len(), "Flushed all indexed data");
        Ok(ToolResponse {
            summary: format!(
                "Flushed index and downloads, cancelled {} running jobs",
                active.len()
            ),
            payload: json!({ "cancelledJobs": active.len() }),
        })
    }

    /// Full snapshot of one job
    pub fn get_job_status(&self, job_id: &str) -> ToolResponse {
        match self.jobs.get(job_id) {
            Some(job) => ToolResponse {
                summary: format!(
                    "Job {} is {} at {:.0}%",
                    job_id, job.status, job.progress
                ),
                payload: serde_json::to_value(&job).unwrap_or_default(),
            },
            None => ToolResponse {
                summary: format!("No job with id {}", job_id),
                payload: serde_json::Value::Null,
            },
        }
    }

    /// Running jobs plus aggregate statistics
    pub fn list_active_jobs(&self) -> ToolResponse {
        let active = self.jobs.list_active();
        let statistics = self.jobs.statistics();
        ToolResponse {
            summary: format!(
                "{} running, {} completed, {} failed",
                statistics.running, statistics.completed, statistics.failed
            ),
            payload: json!({ "active": active, "statistics": statistics }),
        }
    }

    /// Aggregate index statistics
    pub async fn get_statistics(&self) -> Result<ToolResponse> {
        let statistics = self.vectors.statistics().await?;
        Ok(ToolResponse {
            summary: format!(
                "{} files, {} chunks, {} tokens indexed",
                statistics.total_files, statistics.total_chunks, statistics.total_tokens
            ),
            payload: serde_json::to_value(&statistics).unwrap_or_default(),
        })
    }
}
