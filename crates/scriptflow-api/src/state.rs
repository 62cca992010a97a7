use anyhow::{Context, Result};
use scriptflow_ai::{ConversionClient, DeepSeekConfig, DeepSeekProvider, LlmProvider};
use scriptflow_core::{
    InMemoryRepository, ProjectRepository, RateCategory, RateLimitPolicy, RateLimiter, Settings,
};
use scriptflow_queue::JobQueue;
use scriptflow_workflow::{WorkflowCoordinator, WorkflowProcessor};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::auth::JwtManager;

/// Everything a handler needs, built once per process and shared by reference.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repository: Arc<dyn ProjectRepository>,
    pub coordinator: Arc<WorkflowCoordinator>,
    pub limiter: Arc<RateLimiter>,
    pub jwt: Arc<JwtManager>,
    pub converter: Arc<ConversionClient>,
    pub started_at: Instant,
}

impl AppState {
    /// Production wiring: in-memory repository and the DeepSeek provider.
    pub fn new(settings: Settings) -> Result<Self> {
        let llm = DeepSeekProvider::new(DeepSeekConfig::from_settings(&settings.ai))
            .context("Failed to build the LLM client")?;
        Self::with_components(settings, Arc::new(InMemoryRepository::new()), Arc::new(llm))
    }

    pub fn with_components(
        settings: Settings,
        repository: Arc<dyn ProjectRepository>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let generation = DeepSeekConfig::from_settings(&settings.ai).generation_config();
        let processor = WorkflowProcessor::new(repository.clone(), llm.clone(), generation);
        let queue = Arc::new(JobQueue::new(Arc::new(processor), settings.queue.clone()));
        let coordinator = Arc::new(WorkflowCoordinator::new(repository.clone(), queue));
        let converter = ConversionClient::new(&settings.converter)
            .context("Failed to build the conversion client")?;

        info!(
            provider = llm.provider_name(),
            model = llm.model_name(),
            queue_mode = ?settings.queue.mode,
            rate_limiting = settings.rate_limit.enabled,
            "Application state initialized"
        );

        Ok(Self {
            limiter: Arc::new(RateLimiter::new(settings.rate_limit.sweep_interval())),
            jwt: Arc::new(JwtManager::new(&settings.auth)),
            converter: Arc::new(converter),
            settings: Arc::new(settings),
            repository,
            coordinator,
            started_at: Instant::now(),
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        self.coordinator.queue()
    }

    pub fn policy(&self, category: RateCategory) -> RateLimitPolicy {
        let limits = &self.settings.rate_limit;
        match category {
            RateCategory::Api => limits.api,
            RateCategory::Auth => limits.auth,
            RateCategory::Registration => limits.registration,
        }
    }
}
