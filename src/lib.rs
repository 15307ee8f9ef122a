//! EduRail - 学群问答助理
//!
//! 以向量检索比对学群资料库，相似度足够时组合检索上下文，
//! 否则直接交给通用语言模型回答。

pub mod api;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;
