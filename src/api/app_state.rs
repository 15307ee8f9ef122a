use crate::config::config::AppConfig;
use crate::observability::ObservabilityState;
use crate::services::chat::ChatService;
use std::sync::Arc;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Request orchestrator (retrieval, routing, LLM call, history, telemetry)
    pub chat_service: Arc<ChatService>,
    /// Prometheus metrics and health checks
    pub observability: Arc<ObservabilityState>,
    /// Loaded configuration
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("chat_service", &"Arc<ChatService>")
            .field("observability", &"Arc<ObservabilityState>")
            .field("environment", &self.config.environment)
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(
        chat_service: ChatService,
        observability: Arc<ObservabilityState>,
        config: AppConfig,
    ) -> Self {
        Self {
            chat_service: Arc::new(chat_service),
            observability,
            config: Arc::new(config),
        }
    }
}
