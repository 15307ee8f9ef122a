//! 可观测性模块
//!
//! 提供 Prometheus 指标、结构化日志和健康检查。

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry as TraceRegistry, prelude::*};

use crate::config::config::LoggingConfig;
use crate::error::{AppError, Result};

const METRIC_NAMESPACE: &str = "edurail";
const LATENCY_BUCKETS: [f64; 10] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0];

// ===== Metrics =====

/// 应用指标
pub struct AppMetrics {
    registry: Registry,
    http_requests_total: IntCounter,
    http_request_duration: Histogram,
    chat_requests_total: IntCounterVec,
    chat_failures_total: IntCounterVec,
    chat_latency: Histogram,
    corpus_records: IntGauge,
}

impl AppMetrics {
    pub fn new() -> std::result::Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(
            Opts::new("http_requests_total", "Total HTTP requests").namespace(METRIC_NAMESPACE),
        )?;
        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .namespace(METRIC_NAMESPACE)
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let chat_requests_total = IntCounterVec::new(
            Opts::new("chat_requests_total", "Completed chat requests by route")
                .namespace(METRIC_NAMESPACE),
            &["source"],
        )?;
        let chat_failures_total = IntCounterVec::new(
            Opts::new("chat_failures_total", "Failed chat requests by error code")
                .namespace(METRIC_NAMESPACE),
            &["code"],
        )?;
        let chat_latency = Histogram::with_opts(
            HistogramOpts::new(
                "chat_pipeline_seconds",
                "Retrieval + language model pipeline latency in seconds",
            )
            .namespace(METRIC_NAMESPACE)
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let corpus_records = IntGauge::with_opts(
            Opts::new("corpus_records", "Loaded corpus records").namespace(METRIC_NAMESPACE),
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(chat_requests_total.clone()))?;
        registry.register(Box::new(chat_failures_total.clone()))?;
        registry.register(Box::new(chat_latency.clone()))?;
        registry.register(Box::new(corpus_records.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            chat_requests_total,
            chat_failures_total,
            chat_latency,
            corpus_records,
        })
    }

    /// 记录 HTTP 请求
    pub fn record_http_request(&self, seconds: f64) {
        self.http_requests_total.inc();
        self.http_request_duration.observe(seconds);
    }

    /// 记录一次成功的对话
    pub fn record_chat(&self, source: &str, seconds: Option<f64>) {
        self.chat_requests_total.with_label_values(&[source]).inc();
        if let Some(seconds) = seconds {
            self.chat_latency.observe(seconds);
        }
    }

    /// 记录失败的对话
    pub fn record_failure(&self, error: &AppError) {
        let (_, code): (u16, String) = error.into();
        self.chat_failures_total.with_label_values(&[&code]).inc();
    }

    pub fn set_corpus_records(&self, count: usize) {
        self.corpus_records.set(count as i64);
    }

    /// 生成 Prometheus 文本格式
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub corpus_records: usize,
    pub checks: Vec<HealthCheck>,
}

/// 单个健康检查项
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
}

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub message: String,
}

impl HealthCheckResult {
    pub fn healthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            healthy: false,
            message: message.into(),
        }
    }
}

fn status_label(healthy: bool) -> String {
    let label = if healthy { "healthy" } else { "unhealthy" };
    label.to_string()
}

/// 可观测性状态（用于健康检查与指标）
#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<AppMetrics>,
    pub health_checks: Arc<Mutex<Vec<HealthCheckResult>>>,
    pub start_time: DateTime<Utc>,
    pub version: String,
    pub corpus_records: usize,
}

impl ObservabilityState {
    pub fn new(version: String, corpus_records: usize) -> Result<Self> {
        let metrics = AppMetrics::new()
            .map_err(|e| AppError::Internal(format!("failed to register metrics: {}", e)))?;
        metrics.set_corpus_records(corpus_records);

        Ok(Self {
            metrics: Arc::new(metrics),
            health_checks: Arc::new(Mutex::new(Vec::new())),
            start_time: Utc::now(),
            version,
            corpus_records,
        })
    }

    /// 添加健康检查结果，同名结果会被替换
    pub async fn add_health_check(&self, result: HealthCheckResult) {
        let mut checks = self.health_checks.lock().await;
        checks.retain(|c| c.name != result.name);
        checks.push(result);
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

// ===== Health Check Handlers =====

/// 获取完整健康状态
pub async fn health_check(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    let checks = state.health_checks.lock().await;
    let all_healthy = checks.iter().all(|c| c.healthy);

    let health_status = HealthStatus {
        status: status_label(all_healthy),
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
        corpus_records: state.corpus_records,
        checks: checks
            .iter()
            .map(|c| HealthCheck {
                name: c.name.clone(),
                status: status_label(c.healthy),
                message: Some(c.message.clone()),
            })
            .collect(),
    };

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_status))
}

/// 简单存活检查
pub async fn liveness() -> impl IntoResponse {
    "OK"
}

/// 就绪检查
pub async fn readiness(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    let checks = state.health_checks.lock().await;
    let ready = checks.iter().all(|c| c.healthy);

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "ready": ready,
            "corpus_records": state.corpus_records,
        })),
    )
}

/// Prometheus 指标端点
pub async fn metrics(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

/// 版本信息端点
pub async fn version(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.version,
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<ObservabilityState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .with_state(state)
}

// ===== Structured Logging =====

/// 初始化日志
///
/// RUST_LOG 优先于 `logging.level`。设置 `log_dir` 时另写入按日滚动的文件，
/// 返回的 guard 必须存活到进程结束。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard): (Option<Box<dyn Layer<TraceRegistry> + Send + Sync>>, _) =
        match &config.log_dir {
            Some(dir) => {
                let appender = tracing_appender::rolling::daily(dir, "edurail.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = if config.structured {
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .boxed()
                } else {
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .boxed()
                };
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| AppError::Config(format!("failed to initialize tracing: {}", e)))?;

    Ok(guard)
}

// ===== Request Metrics Middleware =====

/// 记录请求指标的中间件
pub async fn metrics_middleware(
    State(state): State<Arc<ObservabilityState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;
    state
        .metrics
        .record_http_request(start.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    #[test]
    fn test_metrics_gather() {
        let metrics = AppMetrics::new().unwrap();
        metrics.record_http_request(0.1);
        metrics.record_chat("AUGMENTED", Some(1.2));
        metrics.record_chat("DIRECT", None);
        metrics.record_failure(&AppError::UpstreamUnavailable("timeout".into()));
        metrics.set_corpus_records(18);

        let output = metrics.gather();
        assert!(output.contains("edurail_http_requests_total 1"));
        assert!(output.contains("edurail_chat_requests_total{source=\"AUGMENTED\"} 1"));
        assert!(output.contains("edurail_chat_failures_total{code=\"SERVICE_UNAVAILABLE\"} 1"));
        assert!(output.contains("edurail_corpus_records 18"));
    }

    #[tokio::test]
    async fn test_readiness_reports_corpus_records() {
        let state = Arc::new(ObservabilityState::new("0.1.0".into(), 18).unwrap());
        state
            .add_health_check(HealthCheckResult::healthy("corpus", "18 records"))
            .await;
        let app = create_observability_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["corpus_records"], 18);

        state
            .add_health_check(HealthCheckResult::unhealthy("corpus", "missing"))
            .await;
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_liveness() {
        let state = Arc::new(ObservabilityState::new("0.1.0".into(), 0).unwrap());
        let response = create_observability_router(state)
            .oneshot(
                HttpRequest::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
