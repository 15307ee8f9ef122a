//! 安全模块
//!
//! 请求输入验证。

pub mod validation;

pub use validation::{ValidationError, ValidationResult};
