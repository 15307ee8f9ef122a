use anyhow::Context;
use edurail::api::{self, app_state::AppState};
use edurail::config::loader::{ConfigLoader, config_exists, default_config_path};
use edurail::index::create_embedding_model;
use edurail::observability::{HealthCheckResult, ObservabilityState, init_tracing};
use edurail::services::{
    ChatService, ConversationHistory, TelemetryCollector, create_chat_model,
    create_retrieval_service,
};
use edurail::storage::{CorpusStore, JsonlLog, RETRIEVAL_LOG};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    ConfigLoader::validate(&config).context("invalid configuration")?;

    let _log_guard = init_tracing(&config.logging)?;

    info!("Starting EduRail ({})...", config.environment);
    if config_exists() {
        info!("Configuration loaded from {}", default_config_path().display());
    } else {
        warn!(
            "{} not found, using defaults and environment overrides",
            default_config_path().display()
        );
    }

    let encoder = create_embedding_model(&config.embedding).await?;
    info!(
        "Embedding model initialized: {} (backend: {}, dimension: {})",
        encoder.name(),
        config.embedding.backend,
        encoder.dimension()
    );

    let corpus = CorpusStore::load(&config.corpus, encoder.as_ref())
        .await
        .with_context(|| format!("failed to load corpus {}", config.corpus.path.display()))?;
    let corpus_records = corpus.len();
    if corpus.is_empty() {
        warn!("Corpus is empty, every request will be answered directly");
    }

    let retrieval_log = JsonlLog::in_dir(config.telemetry.log_dir.as_deref(), RETRIEVAL_LOG);
    let retriever =
        create_retrieval_service(Arc::new(corpus), Arc::clone(&encoder), retrieval_log);
    info!("Retrieval service initialized");

    let llm = create_chat_model(&config.llm)?;
    info!(
        "Language model client initialized: {} at {}",
        llm.model_name(),
        config.llm.endpoint
    );

    let history = Arc::new(ConversationHistory::from_config(&config.conversation));
    let sweeper = Arc::clone(&history);
    tokio::spawn(async move { sweeper.cleanup_task().await });
    let telemetry = Arc::new(TelemetryCollector::from_config(&config.telemetry));
    let chat_service = ChatService::new(retriever, llm, history, telemetry, &config);
    info!("Chat service initialized");

    let observability = Arc::new(ObservabilityState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        corpus_records,
    )?);
    observability
        .add_health_check(HealthCheckResult::healthy(
            "corpus",
            format!("{} records loaded", corpus_records),
        ))
        .await;
    observability
        .add_health_check(HealthCheckResult::healthy(
            "embedding",
            format!("{} ({})", encoder.name(), config.embedding.backend),
        ))
        .await;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(chat_service, observability, config);
    let router = api::initialize_api(app_state).await?;
    info!("API router created with observability endpoints");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
