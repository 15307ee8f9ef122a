//! 存储层模块
//!
//! 只读的学群语料库与追加式 JSONL 日志。

pub mod corpus;
pub mod jsonl;

pub use corpus::CorpusStore;
pub use jsonl::{CONVERSATION_LOG, JsonlLog, METRICS_LOG, RETRIEVAL_LOG};
