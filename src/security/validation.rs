//! Request Validation Module
//!
//! Validates chat messages and client-supplied session identifiers before any
//! retrieval or upstream work happens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum message length, counted in Unicode scalar values.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 1000;

/// Maximum session identifier length.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Validation error types
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' must not be empty")]
    Empty { field: String },

    #[error("Field '{field}' is too long (max: {max}, got: {got})")]
    TooLong {
        field: String,
        max: usize,
        got: usize,
    },

    #[error("Field '{field}' contains invalid characters: {chars}")]
    InvalidCharacters { field: String, chars: String },

    #[error("Field '{field}' is malformed: {reason}")]
    Malformed { field: String, reason: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            Self::Empty { field } => field.as_str(),
            Self::TooLong { field, .. } => field.as_str(),
            Self::InvalidCharacters { field, .. } => field.as_str(),
            Self::Malformed { field, .. } => field.as_str(),
        }
    }

    /// 面向使用者的繁體中文訊息
    pub fn localized(&self) -> String {
        match self {
            Self::Empty { .. } => "訊息不可為空".to_string(),
            Self::TooLong { max, .. } => format!("訊息長度不可超過{}字", max),
            Self::InvalidCharacters { .. } => "對話識別碼格式不正確".to_string(),
            Self::Malformed { .. } => "請求格式不正確".to_string(),
        }
    }
}

/// Validation result type
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Validate a chat message.
///
/// Whitespace-only input counts as empty. Length is measured in characters so
/// that a 1000-character Traditional Chinese message is accepted even though it
/// is roughly 3000 bytes of UTF-8.
pub fn validate_message(message: &str, max_chars: usize) -> ValidationResult<()> {
    if message.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "message".to_string(),
        });
    }

    let got = message.chars().count();
    if got > max_chars {
        return Err(ValidationError::TooLong {
            field: "message".to_string(),
            max: max_chars,
            got,
        });
    }

    Ok(())
}

/// Validate a client-supplied session identifier.
pub fn validate_session_id(session_id: &str) -> ValidationResult<()> {
    if session_id.is_empty() {
        return Err(ValidationError::Empty {
            field: "session_id".to_string(),
        });
    }

    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "session_id".to_string(),
            max: MAX_SESSION_ID_LEN,
            got: session_id.len(),
        });
    }

    let invalid: String = session_id
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::InvalidCharacters {
            field: "session_id".to_string(),
            chars: invalid,
        });
    }

    Ok(())
}
