//! 对话 DTO
//!
//! 定义对话相关的请求和响应数据结构。

use serde::{Deserialize, Serialize};

use crate::models::conversation::ConversationTurn;
use crate::models::metrics::MetricsSnapshot;
use crate::services::chat::ChatOutcome;
use crate::services::router::Route;

/// 对话请求
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    /// 使用者讯息
    pub message: String,
    /// 会话 ID，省略时建立新会话
    #[serde(default)]
    pub session_id: Option<String>,
}

/// 对话响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// 模型回复
    pub response: String,
    /// "AUGMENTED" 或 "DIRECT"
    pub source: Route,
    /// 匹配的学群名称；DIRECT 时为 null
    pub matched_groups: Option<Vec<String>>,
    /// 本次请求的指标
    pub metrics: MetricsSnapshot,
    /// 会话 ID
    pub session_id: String,
}

impl From<ChatOutcome> for ChatResponse {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            response: outcome.response,
            source: outcome.source,
            matched_groups: outcome.matched_groups,
            metrics: outcome.metrics,
            session_id: outcome.session_id,
        }
    }
}

/// 重置对话请求
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResetChatRequest {
    pub session_id: String,
}

/// 重置对话响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetChatResponse {
    pub status: String,
    pub message: String,
    pub session_id: String,
    /// 会话原本是否存在
    pub existed: bool,
}

/// 会话历史响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
    pub max_turns: usize,
}

/// 服务信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: String,
    pub corpus_records: usize,
}
