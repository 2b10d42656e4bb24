// src/state.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::services::image_resolver::ImageResolver;
use crate::services::metrics_manager::MetricsManager;
use crate::services::openai::OpenAiClient;
use crate::services::session_manager::SessionManager;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub sessions: SessionManager,
    pub metrics: MetricsManager,
    pub llm: OpenAiClient,
    pub images: ImageResolver,
}

impl AppState {
    pub fn new(
        session_ttl: Duration,
        llm: OpenAiClient,
        image_cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(session_ttl),
            metrics: MetricsManager::new(),
            images: ImageResolver::new(llm.clone(), image_cache_dir),
            llm,
        }
    }
}
