//! 对话编排服务
//!
//! 一次请求的完整流程：验证 → 编码 → 检索 → 路由 → 组装提示词 →
//! 呼叫语言模型 → 写入历史 → 记录遥测。任何阶段失败都不会写入历史或指标。

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::conversation::ConversationTurn;
use crate::models::metrics::MetricsSnapshot;
use crate::security::validation::{validate_message, validate_session_id};
use crate::services::conversation::{ConversationHistory, ConversationLogEntry};
use crate::services::llm::{ChatMessage, ChatModel};
use crate::services::prompt::{PromptBuilder, PromptCategory};
use crate::services::retrieval::RetrievalService;
use crate::services::router::{QueryRouter, Route};
use crate::services::telemetry::TelemetryCollector;
use crate::storage::{CONVERSATION_LOG, JsonlLog};

/// 请求处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Received,
    Encoded,
    Retrieved,
    Routed,
    PromptBuilt,
    Calling,
    Responded,
    Recorded,
    Done,
    Failed,
}

impl RequestStage {
    /// 合法的下一阶段；任何非终止阶段都可以进入 Failed
    pub fn can_advance_to(self, next: RequestStage) -> bool {
        use RequestStage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Received, Encoded)
            | (Encoded, Retrieved)
            | (Retrieved, Routed)
            | (Routed, PromptBuilt)
            | (Routed, Calling)
            | (PromptBuilt, Calling)
            | (Calling, Responded)
            | (Responded, Recorded)
            | (Recorded, Done) => true,
            _ => false,
        }
    }
}

/// 追踪单次请求的阶段变化
struct StageTracker<'a> {
    session_id: &'a str,
    stage: RequestStage,
}

impl<'a> StageTracker<'a> {
    fn new(session_id: &'a str) -> Self {
        debug!(session_id, stage = ?RequestStage::Received, "request received");
        Self {
            session_id,
            stage: RequestStage::Received,
        }
    }

    fn advance(&mut self, next: RequestStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(session_id = self.session_id, from = ?self.stage, to = ?next, "stage transition");
        self.stage = next;
    }

    fn fail(&mut self, error: &AppError) {
        warn!(
            session_id = self.session_id,
            stage = ?self.stage,
            error = %error,
            "request failed"
        );
        self.stage = RequestStage::Failed;
    }
}

/// 一次成功请求的结果
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub source: Route,
    /// Direct 路由时为 None
    pub matched_groups: Option<Vec<String>>,
    pub category: Option<PromptCategory>,
    pub metrics: MetricsSnapshot,
    pub session_id: String,
}

#[derive(Debug, Clone)]
struct ChatSettings {
    top_k: usize,
    max_message_chars: usize,
    system_prompt: String,
    include_history: bool,
}

pub struct ChatService {
    retriever: Arc<dyn RetrievalService>,
    llm: Arc<dyn ChatModel>,
    history: Arc<ConversationHistory>,
    telemetry: Arc<TelemetryCollector>,
    router: QueryRouter,
    prompts: PromptBuilder,
    conversation_log: Option<Arc<JsonlLog>>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        retriever: Arc<dyn RetrievalService>,
        llm: Arc<dyn ChatModel>,
        history: Arc<ConversationHistory>,
        telemetry: Arc<TelemetryCollector>,
        config: &AppConfig,
    ) -> Self {
        Self {
            retriever,
            llm,
            history,
            telemetry,
            router: QueryRouter::new(config.retrieval.similarity_threshold),
            prompts: PromptBuilder::from_config(&config.prompt),
            conversation_log: JsonlLog::in_dir(
                config.telemetry.log_dir.as_deref(),
                CONVERSATION_LOG,
            ),
            settings: ChatSettings {
                top_k: config.retrieval.top_k,
                max_message_chars: config.retrieval.max_message_chars,
                system_prompt: config.llm.system_prompt.clone(),
                include_history: config.llm.include_history,
            },
        }
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn corpus_size(&self) -> usize {
        self.retriever.corpus_size()
    }

    /// 处理一则讯息；未提供 session_id 时建立新会话
    pub async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatOutcome> {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut tracker = StageTracker::new(&session_id);
        let result = match self.validate(message, &session_id) {
            Ok(()) => self.run(&mut tracker, message.trim(), &session_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                tracker.advance(RequestStage::Done);
                info!(
                    session_id = %session_id,
                    source = %outcome.source,
                    "chat request completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracker.fail(&e);
                // 失败的请求不留下空会话
                self.history.release(&session_id);
                Err(e)
            }
        }
    }

    fn validate(&self, message: &str, session_id: &str) -> Result<()> {
        validate_message(message, self.settings.max_message_chars)?;
        validate_session_id(session_id)?;
        Ok(())
    }

    async fn run(
        &self,
        tracker: &mut StageTracker<'_>,
        query: &str,
        session_id: &str,
    ) -> Result<ChatOutcome> {
        // 同一会话的请求在此串行化，直到本次请求结束
        let handle = self.history.session(session_id);
        let mut session = handle.lock().await;
        let start = Instant::now();

        let query_vector = self.retriever.encode_query(query).await?;
        tracker.advance(RequestStage::Encoded);

        let results = self
            .retriever
            .rank(query, &query_vector, self.settings.top_k)
            .await?;
        tracker.advance(RequestStage::Retrieved);

        let source = self
            .router
            .route(results.first().map(|r| r.similarity_score));
        tracker.advance(RequestStage::Routed);

        let (prompt, category, matched_groups) = match source {
            Route::Augmented => {
                let category = self.prompts.select_category(query);
                let context = results
                    .iter()
                    .map(|r| r.context_block())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let prompt = self.prompts.build(query, &context, Some(category));
                tracker.advance(RequestStage::PromptBuilt);

                let groups = results.iter().map(|r| r.group_name.clone()).collect();
                (prompt, Some(category), Some(groups))
            }
            Route::Direct => (query.to_string(), None, None),
        };

        let mut messages = Vec::with_capacity(session.len() + 2);
        messages.push(ChatMessage::system(self.settings.system_prompt.clone()));
        if self.settings.include_history {
            messages.extend(session.snapshot().iter().map(ChatMessage::from));
        }
        messages.push(ChatMessage::user(prompt));

        tracker.advance(RequestStage::Calling);
        let response = self.llm.chat(&messages).await?;
        tracker.advance(RequestStage::Responded);

        // 读数先于任何写入；以下到 commit 为止不能有 await，
        // 取消只会发生在历史与指标都未变动之前
        let readings = self.telemetry.sample().await;

        session.append(ConversationTurn::user(query));
        session.append(ConversationTurn::assistant(response.clone()));
        let end = Instant::now();

        let mut extra = serde_json::Map::new();
        extra.insert("source".into(), serde_json::json!(source));
        if let Some(category) = category {
            extra.insert("prompt_category".into(), serde_json::json!(category));
        }
        let metrics = self.telemetry.commit(
            readings,
            start,
            end,
            query.chars().count(),
            response.chars().count(),
            extra,
        );
        tracker.advance(RequestStage::Recorded);
        drop(session);

        self.telemetry.persist(&metrics).await;
        if let Some(log) = &self.conversation_log {
            let entry = ConversationLogEntry {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                user_message: query.to_string(),
                ai_response: response.clone(),
            };
            log.append_or_warn(&entry).await;
        }

        Ok(ChatOutcome {
            response,
            source,
            matched_groups,
            category,
            metrics,
            session_id: session_id.to_string(),
        })
    }

    /// 清空会话历史；会话不存在时返回 false
    pub async fn reset(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        Ok(self.history.reset(session_id).await)
    }

    pub async fn session_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        validate_session_id(session_id)?;
        Ok(self.history.snapshot(session_id).await)
    }
}
