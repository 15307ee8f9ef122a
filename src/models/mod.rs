//! 数据模型模块

pub mod conversation;
pub mod corpus;
pub mod metrics;
