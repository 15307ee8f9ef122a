//! API 模块
//!
//! 提供 REST API 支持。

#[cfg(test)]
mod api_tests;
pub mod app_state;
pub mod dto;
pub mod extract;
pub mod handlers;
pub mod routes;

use crate::api::app_state::AppState;
use crate::error::AppError;
use crate::observability::{create_observability_router, metrics_middleware};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router(app_state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::chat_routes::create_chat_router())
        .merge(routes::telemetry_routes::create_telemetry_router());

    let observability = Arc::clone(&app_state.observability);

    Router::new()
        .route("/", get(handlers::service_info))
        .nest("/api", api)
        .with_state(app_state)
        .merge(create_observability_router(Arc::clone(&observability)))
        .layer(axum::middleware::from_fn_with_state(
            observability,
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn initialize_api(app_state: AppState) -> Result<Router, AppError> {
    tracing::info!("Initializing API router...");
    Ok(create_router(app_state))
}
