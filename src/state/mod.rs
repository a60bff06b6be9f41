use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::config::{AppPaths, ConfigService, RagSettings};
use crate::core::errors::ApiError;
use crate::core::security::{init_session_token, SessionToken};
use crate::history::HistoryStore;
use crate::models::ModelRegistry;
use crate::rag::RagPipeline;
use crate::workspace::WorkspaceManager;

pub mod error;

use error::InitializationError;

/// Application state shared by every route.
///
/// The pipeline and model registry are rebuilt whenever the configuration is
/// updated through the API; handlers take a snapshot per request.
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub session_token: SessionToken,
    pub history: HistoryStore,
    pub workspaces: WorkspaceManager,
    pipeline: RwLock<Arc<RagPipeline>>,
    models: RwLock<Arc<ModelRegistry>>,
    jobs: Arc<Semaphore>,
}

impl AppState {
    /// Discovers paths, loads configuration, opens the history database and
    /// wires the RAG pipeline.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let settings = config
            .settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        let pipeline = RagPipeline::from_settings(settings)
            .map_err(|e| InitializationError::Pipeline(e.into()))?;

        Self::with_pipeline(paths, init_session_token(), pipeline).await
    }

    /// Builds state around an already-constructed pipeline.
    pub async fn with_pipeline(
        paths: Arc<AppPaths>,
        session_token: SessionToken,
        pipeline: RagPipeline,
    ) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let history = HistoryStore::new(&paths.history_db_path)
            .await
            .map_err(|e| InitializationError::History(e.into()))?;
        let workspaces = WorkspaceManager::new(paths.sessions_dir.clone());

        let settings = pipeline.settings();
        let models = ModelRegistry::from_options(settings.llm.models.clone());
        let jobs = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));

        Ok(Arc::new(AppState {
            paths,
            config,
            session_token,
            history,
            workspaces,
            pipeline: RwLock::new(Arc::new(pipeline)),
            models: RwLock::new(Arc::new(models)),
            jobs,
        }))
    }

    pub fn pipeline(&self) -> Arc<RagPipeline> {
        match self.pipeline.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn models(&self) -> Arc<ModelRegistry> {
        match self.models.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn settings(&self) -> RagSettings {
        self.pipeline().settings().clone()
    }

    /// Rebuilds the pipeline and model registry from the current config.
    ///
    /// Requests already running keep the pipeline they started with.
    pub fn reload(&self) -> Result<(), ApiError> {
        let settings = self.config.settings()?;
        let models = ModelRegistry::from_options(settings.llm.models.clone());
        let pipeline = RagPipeline::from_settings(settings)?;

        self.replace_pipeline(pipeline);
        match self.models.write() {
            Ok(mut guard) => *guard = Arc::new(models),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(models),
        }
        tracing::info!("Reloaded RAG pipeline from configuration");
        Ok(())
    }

    /// Swaps in `pipeline` for subsequent requests.
    pub fn replace_pipeline(&self, pipeline: RagPipeline) {
        match self.pipeline.write() {
            Ok(mut guard) => *guard = Arc::new(pipeline),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(pipeline),
        }
    }

    /// Waits for a slot among the concurrent ingest/query jobs.
    pub async fn acquire_job(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        self.jobs
            .clone()
            .acquire_owned()
            .await
            .map_err(ApiError::internal)
    }
}
