//! 服务模块

pub mod chat;
pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod retrieval;
pub mod router;
pub mod telemetry;

pub use chat::{ChatOutcome, ChatService, RequestStage};
pub use conversation::{ConversationHistory, ConversationLogEntry, SessionHandle};
pub use llm::{ChatMessage, ChatModel, OllamaChatClient, create_chat_model};
pub use prompt::{PromptBuilder, PromptCategory, TemplateInfo};
pub use retrieval::{CorpusRetriever, RetrievalLogEntry, RetrievalService, create_retrieval_service};
pub use router::{QueryRouter, Route};
pub use telemetry::{DisabledProbe, HostProbe, ResourceProbe, ResourceReadings, TelemetryCollector};
