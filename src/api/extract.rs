//! 请求提取器
//!
//! 请求体解析失败时返回统一的 `ErrorResponse`，而不是 axum 默认的纯文本拒绝。

use axum::{
    Json, async_trait,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AppError;
use crate::security::validation::ValidationError;

/// JSON 请求体
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(reject(rejection)),
        }
    }
}

fn reject(rejection: JsonRejection) -> AppError {
    debug!("Rejected request body: {}", rejection.body_text());
    AppError::Validation(ValidationError::Malformed {
        field: "body".to_string(),
        reason: rejection.body_text(),
    })
}
