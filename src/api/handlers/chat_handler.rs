use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::debug;

use crate::{
    api::{app_state::AppState, dto::chat_dto::*, extract::ApiJson},
    error::AppError,
};

pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ServiceInfo {
        service: "EduRail AI Assistant".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        corpus_records: state.chat_service.corpus_size(),
    })
}

pub async fn chat(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    debug!(
        "Chat request: {} chars, session {:?}",
        request.message.chars().count(),
        request.session_id
    );

    let result = state
        .chat_service
        .chat(&request.message, request.session_id.as_deref())
        .await;

    match result {
        Ok(outcome) => {
            state
                .observability
                .metrics
                .record_chat(outcome.source.as_str(), outcome.metrics.processing_time);
            Ok(Json(ChatResponse::from(outcome)))
        }
        Err(e) => {
            state.observability.metrics.record_failure(&e);
            Err(e)
        }
    }
}

pub async fn reset_chat(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ResetChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    debug!("Resetting session: {}", request.session_id);

    let existed = state.chat_service.reset(&request.session_id).await?;

    Ok(Json(ResetChatResponse {
        status: "success".to_string(),
        message: "對話已重置".to_string(),
        session_id: request.session_id,
        existed,
    }))
}

pub async fn get_session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    debug!("Getting history for session: {}", session_id);

    let turns = state.chat_service.session_history(&session_id).await?;

    Ok(Json(SessionHistoryResponse {
        session_id,
        turns,
        max_turns: state.chat_service.history().max_turns(),
    }))
}
