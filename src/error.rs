//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::embedding::EncodingError;
use crate::security::validation::ValidationError;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数验证错误
    #[error("参数验证失败: {0}")]
    Validation(#[from] ValidationError),

    /// 检索错误（编码失败或向量维度不一致）
    #[error("检索失败: {0}")]
    Retrieval(String),

    /// 嵌入模型错误
    #[error("嵌入模型错误: {0}")]
    Embedding(#[from] EncodingError),

    /// 上游语言模型不可用（连接失败或超时）
    #[error("上游模型不可用: {0}")]
    UpstreamUnavailable(String),

    /// 知识库载入错误
    #[error("知识库载入失败: {0}")]
    Corpus(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// 对外显示的讯息，不包含内部细节
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(e) => e.localized(),
            AppError::UpstreamUnavailable(_) => "AI服務暫時無法連線，請稍後再試".to_string(),
            _ => "系統處理錯誤，請稍後再試".to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for AppError {
    fn from(e: tracing_subscriber::filter::ParseError) -> Self {
        AppError::Config(format!("invalid log level: {}", e))
    }
}

impl AppError {
    /// 构建带请求 ID 的 HTTP 响应
    pub fn into_response_with_request_id(self, request_id: Option<&str>) -> Response {
        let (status, code) = (&self).into();
        if status >= 500 {
            tracing::error!(code = %code, request_id = ?request_id, error = %self, "request failed");
        }

        let mut body = ErrorResponse::new(&code, &self.public_message());
        if let AppError::Validation(e) = &self {
            body = body.with_details(e.field());
        }
        if let Some(id) = request_id {
            body = body.with_request_id(id);
        }

        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response()
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with_request_id(None)
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
    /// 详细信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// 请求 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// 创建新错误响应
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
            request_id: None,
        }
    }

    /// 添加详细信息
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    /// 添加请求 ID
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

/// HTTP 状态码映射
impl From<&AppError> for (u16, String) {
    fn from(err: &AppError) -> (u16, String) {
        match err {
            AppError::Validation(_) => (400, "BAD_REQUEST".to_string()),
            AppError::UpstreamUnavailable(_) => (503, "SERVICE_UNAVAILABLE".to_string()),
            AppError::Retrieval(_) => (500, "RETRIEVAL_ERROR".to_string()),
            AppError::Embedding(_) => (500, "EMBEDDING_ERROR".to_string()),
            _ => (500, "INTERNAL_ERROR".to_string()),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
