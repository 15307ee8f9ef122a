#[cfg(test)]
mod chat_handler_tests {
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::api::{app_state::AppState, create_router};
    use crate::config::config::AppConfig;
    use crate::error::{AppError, Result};
    use crate::index::{BlockingEmbeddingModel, EmbeddingModel, HashingEncoder};
    use crate::models::corpus::CorpusEntry;
    use crate::observability::ObservabilityState;
    use crate::services::{
        ChatMessage, ChatModel, ChatService, ConversationHistory, CorpusRetriever, DisabledProbe,
        TelemetryCollector,
    };
    use crate::storage::CorpusStore;

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            Ok(format!("收到 {} 則訊息", messages.len()))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct OfflineModel;

    #[async_trait]
    impl ChatModel for OfflineModel {
        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
            Err(AppError::UpstreamUnavailable(
                "connect error: 127.0.0.1:11434".into(),
            ))
        }

        fn model_name(&self) -> &str {
            "offline"
        }
    }

    async fn app_with(llm: Arc<dyn ChatModel>) -> Router {
        let config = AppConfig::testing();
        let encoder: Arc<dyn EmbeddingModel> = Arc::new(BlockingEmbeddingModel::new(
            HashingEncoder::new(config.embedding.dimension),
            config.embedding.batch_size,
        ));
        let entries = vec![CorpusEntry::new("資訊學群", "資訊學群介紹", "程式設計")];
        let corpus = Arc::new(
            CorpusStore::build(entries, encoder.as_ref(), false, false)
                .await
                .unwrap(),
        );
        let corpus_records = corpus.len();
        let retriever = Arc::new(CorpusRetriever::new(corpus, encoder, None));
        let history = Arc::new(ConversationHistory::new(config.conversation.max_turns));
        let telemetry = Arc::new(TelemetryCollector::new(Arc::new(DisabledProbe), 10, None));
        let chat_service = ChatService::new(retriever, llm, history, telemetry, &config);
        let observability =
            Arc::new(ObservabilityState::new("test".into(), corpus_records).unwrap());

        create_router(AppState::new(chat_service, observability, config))
    }

    async fn app() -> Router {
        app_with(Arc::new(EchoModel)).await
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_root_returns_service_info() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["corpus_records"], 1);
    }

    #[tokio::test]
    async fn test_chat_returns_augmented_response() {
        let app = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "資訊學群是什麼", "session_id": "web-1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "AUGMENTED");
        assert_eq!(body["matched_groups"], json!(["資訊學群"]));
        assert_eq!(body["session_id"], "web-1");
        assert_eq!(body["response"], "收到 2 則訊息");
        assert!(body["metrics"]["processing_time"].is_number());

        let (status, history) = send(&app, "GET", "/api/sessions/web-1/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["turns"].as_array().unwrap().len(), 2);
        assert_eq!(history["turns"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_chat_without_session_id_creates_one() {
        let app = app().await;
        let (status, body) =
            send(&app, "POST", "/api/chat", Some(json!({"message": "hello"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body["session_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejects_long_message() {
        let app = app().await;
        let message = "字".repeat(1001);
        let (status, body) =
            send(&app, "POST", "/api/chat", Some(json!({"message": message}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert_eq!(body["message"], "訊息長度不可超過1000字");
        assert_eq!(body["details"], "message");
    }

    #[tokio::test]
    async fn test_malformed_body_returns_error_response() {
        let app = app().await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"session_id": "no-message"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert_eq!(body["message"], "請求格式不正確");
        assert_eq!(body["details"], "body");

        let request = Request::builder()
            .method("POST")
            .uri("/api/reset_chat")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_chat_upstream_failure_returns_503() {
        let app = app_with(Arc::new(OfflineModel)).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "資訊學群是什麼"})),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
        // 内部细节不外泄
        assert!(!body["message"].as_str().unwrap().contains("11434"));

        let (_, history) = send(&app, "GET", "/api/metrics/history", None).await;
        assert_eq!(history["count"], 0);
    }

    #[tokio::test]
    async fn test_reset_chat() {
        let app = app().await;
        send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"message": "hello", "session_id": "r1"})),
        )
        .await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/reset_chat",
            Some(json!({"session_id": "r1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["existed"], true);

        let (_, history) = send(&app, "GET", "/api/sessions/r1/history", None).await;
        assert!(history["turns"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_history_and_clear() {
        let app = app().await;
        send(&app, "POST", "/api/chat", Some(json!({"message": "hello"}))).await;
        send(&app, "POST", "/api/chat", Some(json!({"message": "world"}))).await;

        let (status, body) = send(&app, "GET", "/api/metrics/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["capacity"], 10);

        let (status, body) = send(&app, "DELETE", "/api/metrics/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], 2);

        let (_, body) = send(&app, "GET", "/api/metrics/history", None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_list_templates() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/api/templates", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default"], "introduction");
        assert_eq!(body["templates"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_prometheus_metrics_exposed() {
        let app = app().await;
        send(&app, "POST", "/api/chat", Some(json!({"message": "hello"}))).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("edurail_chat_requests_total{source=\"DIRECT\"} 1"));
    }
}
