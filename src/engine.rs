//! Engine assembly: wires paths, storage, backends, jobs, and tools
//!
//! Everything here is explicit dependency injection; there are no process
//! globals beyond the one-time vector-extension registration.

use crate::config::EngineConfig;
use crate::embedding::{select_backend, EmbeddingBackend, SamplingClient};
use crate::error::Result;
use crate::jobs::JobManager;
use crate::learning::LearningAlgorithm;
use crate::paths::AppPaths;
use crate::pipeline::PipelineOrchestrator;
use crate::recommend::RecommendationEngine;
use crate::search::SearchService;
use crate::store::{Database, RecommendationRepository, VectorRepository};
use crate::tools::ToolHandler;
use std::sync::Arc;
use tracing::info;

/// Fully wired search engine
pub struct SearchEngine {
    config: EngineConfig,
    paths: AppPaths,
    jobs: JobManager,
    vectors: Arc<VectorRepository>,
    recommendations: Arc<RecommendationRepository>,
    search: Arc<SearchService>,
    pipeline: Arc<PipelineOrchestrator>,
    learning: LearningAlgorithm,
    tools: ToolHandler,
    backend_id: &'static str,
}

impl SearchEngine {
    /// Build the engine, selecting the embedding backend from the
    /// environment
    pub fn new(
        config: EngineConfig,
        paths: AppPaths,
        sampling: Option<Arc<dyn SamplingClient>>,
    ) -> Result<Self> {
        let backend = select_backend(&config.embedding, sampling)?;
        Self::with_backend(config, paths, backend)
    }

    /// Build the engine around an explicit embedding backend
    pub fn with_backend(
        config: EngineConfig,
        paths: AppPaths,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| crate::error::SearchError::Config(e.to_string()))?;
        paths.ensure()?;

        let database = Arc::new(Database::open(
            &paths.database_file(),
            backend.dimension(),
        )?);
        let vectors = Arc::new(VectorRepository::new(Arc::clone(&database)));
        let recommendations = Arc::new(RecommendationRepository::new(database));

        let jobs = JobManager::new(config.jobs.terminal_linger_ms);
        let engine = RecommendationEngine::new(
            Arc::clone(&recommendations),
            config.recommendation.clone(),
        );
        let search = Arc::new(SearchService::new(
            Arc::clone(&backend),
            Arc::clone(&vectors),
            Arc::clone(&recommendations),
            engine,
        ));
        let pipeline = Arc::new(PipelineOrchestrator::new(
            config.reader.clone(),
            config.chunking.clone(),
            config.fetch.clone(),
            Arc::clone(&backend),
            Arc::clone(&vectors),
            jobs.clone(),
            paths.clone(),
        )?);
        let learning = LearningAlgorithm::new(Arc::clone(&recommendations));
        let tools = ToolHandler::new(
            Arc::clone(&search),
            Arc::clone(&pipeline),
            jobs.clone(),
            Arc::clone(&vectors),
            Arc::clone(&recommendations),
            paths.clone(),
        );

        info!(backend = backend.id(), "Search engine assembled");
        Ok(Self {
            config,
            paths,
            jobs,
            vectors,
            recommendations,
            search,
            pipeline,
            learning,
            tools,
            backend_id: backend.id(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// The MCP tool surface
    pub fn tools(&self) -> &ToolHandler {
        &self.tools
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn vectors(&self) -> &Arc<VectorRepository> {
        &self.vectors
    }

    pub fn recommendations(&self) -> &Arc<RecommendationRepository> {
        &self.recommendations
    }

    pub fn search_service(&self) -> &Arc<SearchService> {
        &self.search
    }

    pub fn pipeline(&self) -> &Arc<PipelineOrchestrator> {
        &self.pipeline
    }

    /// Consumer for effectiveness feedback
    pub fn learning(&self) -> &LearningAlgorithm {
        &self.learning
    }

    /// Identifier of the selected embedding backend
    pub fn backend_id(&self) -> &'static str {
        self.backend_id
    }
}
