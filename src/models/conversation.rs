use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 对话角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 使用者
    User,
    /// 助理
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 对话轮次，追加后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// 有界对话会话（滑动窗口）
///
/// 长度始终不超过 `max_turns`，超出时从最旧的轮次开始淘汰。
#[derive(Debug, Clone)]
pub struct ConversationSession {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationSession {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// 当前轮次的有序副本
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(10)]
    #[case(11)]
    #[case(57)]
    fn test_sliding_window_keeps_most_recent(#[case] appends: usize) {
        let mut session = ConversationSession::new(10);
        for i in 0..appends {
            session.append(ConversationTurn::user(format!("turn {}", i)));
        }

        assert_eq!(session.len(), appends.min(10));

        let contents: Vec<String> = session.snapshot().into_iter().map(|t| t.content).collect();
        let expected: Vec<String> = (appends.saturating_sub(10)..appends)
            .map(|i| format!("turn {}", i))
            .collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_reset_clears_session() {
        let mut session = ConversationSession::new(4);
        session.append(ConversationTurn::user("hi"));
        session.append(ConversationTurn::assistant("hello"));
        session.reset();
        assert!(session.is_empty());

        session.append(ConversationTurn::user("again"));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut session = ConversationSession::new(4);
        session.append(ConversationTurn::user("first"));
        let snapshot = session.snapshot();
        session.append(ConversationTurn::assistant("second"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ConversationTurn::assistant("ok")).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }
}
