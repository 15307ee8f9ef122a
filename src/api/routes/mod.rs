//! Routes 模块
//!
//! 定义 API 路由。

pub mod chat_routes;
pub mod telemetry_routes;
