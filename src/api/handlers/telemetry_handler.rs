use axum::{Json, extract::State, response::IntoResponse};
use tracing::debug;

use crate::{
    api::{app_state::AppState, dto::telemetry_dto::*},
    services::prompt::PromptCategory,
};

pub async fn get_metrics_history(State(state): State<AppState>) -> impl IntoResponse {
    let telemetry = state.chat_service.telemetry();
    let snapshots = telemetry.history();
    debug!("Returning {} metrics snapshots", snapshots.len());

    Json(MetricsHistoryResponse {
        count: snapshots.len(),
        capacity: telemetry.capacity(),
        snapshots,
    })
}

pub async fn clear_metrics_history(State(state): State<AppState>) -> impl IntoResponse {
    let telemetry = state.chat_service.telemetry();
    let cleared = telemetry.len();
    telemetry.clear();
    debug!("Cleared {} metrics snapshots", cleared);

    Json(ClearMetricsResponse {
        status: "success".to_string(),
        cleared,
    })
}

pub async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(TemplatesResponse {
        default: PromptCategory::default().key().to_string(),
        templates: state.chat_service.prompts().available_categories(),
    })
}
