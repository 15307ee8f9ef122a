//! Telemetry Routes
//!
//! 指标历史与模板列表。

use crate::api::handlers::telemetry_handler::*;
use axum::{Router, routing::get};

use crate::api::app_state::AppState;

pub fn create_telemetry_router() -> Router<AppState> {
    Router::new()
        .route(
            "/metrics/history",
            get(get_metrics_history).delete(clear_metrics_history),
        )
        .route("/templates", get(list_templates))
}
