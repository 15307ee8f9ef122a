//! 对话历史服务
//!
//! 会话按 id 保存在并发 map 中，每个会话有自己的异步锁：
//! 同一会话的请求串行执行，不同会话互不阻塞。
//!
//! 会话数量有上限。达到上限时先回收闲置超过 TTL 的会话，仍不足时回收最久未使用的会话；
//! 正在被请求持有的会话不会被回收。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::config::ConversationConfig;
use crate::models::conversation::{ConversationSession, ConversationTurn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub type SessionHandle = Arc<Mutex<ConversationSession>>;

/// 对话日志中的一行
#[derive(Debug, Clone, Serialize)]
pub struct ConversationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_message: String,
    pub ai_response: String,
}

#[derive(Debug)]
struct SessionSlot {
    handle: SessionHandle,
    last_used: parking_lot::Mutex<Instant>,
}

impl SessionSlot {
    fn new(max_turns: usize) -> Self {
        Self {
            handle: Arc::new(Mutex::new(ConversationSession::new(max_turns))),
            last_used: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) -> SessionHandle {
        *self.last_used.lock() = Instant::now();
        Arc::clone(&self.handle)
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// 只有 map 自己持有句柄时才可回收。
    /// 调用方必须持有该分片的写锁，否则计数可能被并发的 `session` 改变
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }
}

#[derive(Debug)]
pub struct ConversationHistory {
    sessions: DashMap<String, SessionSlot>,
    max_turns: usize,
    max_sessions: usize,
    idle_ttl: Duration,
    evictions: AtomicU64,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        let defaults = ConversationConfig::default();
        Self::with_limits(
            max_turns,
            defaults.max_sessions,
            Duration::from_secs(defaults.session_ttl_secs),
        )
    }

    pub fn with_limits(max_turns: usize, max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns: max_turns.max(1),
            max_sessions: max_sessions.max(1),
            idle_ttl,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::with_limits(
            config.max_turns,
            config.max_sessions,
            Duration::from_secs(config.session_ttl_secs),
        )
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// 取得会话，不存在时建立
    pub fn session(&self, session_id: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(session_id) {
            return existing.touch();
        }

        if self.sessions.len() >= self.max_sessions {
            self.evict();
        }

        let slot = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation session {}", session_id);
                SessionSlot::new(self.max_turns)
            });
        slot.touch()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|slot| Arc::clone(&slot.handle))
    }

    pub async fn append(&self, session_id: &str, turn: ConversationTurn) {
        let handle = self.session(session_id);
        handle.lock().await.append(turn);
    }

    /// 清空会话；会话不存在时返回 false
    pub async fn reset(&self, session_id: &str) -> bool {
        let Some(handle) = self.get(session_id) else {
            return false;
        };
        handle.lock().await.reset();
        drop(handle);
        self.release(session_id);
        debug!("Reset conversation session {}", session_id);
        true
    }

    /// 会话不存在时返回空列表
    pub async fn snapshot(&self, session_id: &str) -> Vec<ConversationTurn> {
        match self.get(session_id) {
            Some(handle) => handle.lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    /// 移除没有任何轮次且未被占用的会话，返回是否移除
    pub fn release(&self, session_id: &str) -> bool {
        self.sessions
            .remove_if(session_id, |_, slot| {
                !slot.in_use() && matches!(slot.handle.try_lock(), Ok(session) if session.is_empty())
            })
            .is_some()
    }

    /// 回收闲置超过 TTL 的会话，返回回收数量
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| {
            slot.in_use() || now.saturating_duration_since(slot.last_used()) < self.idle_ttl
        });
        let removed = before.saturating_sub(self.sessions.len());
        self.record_evictions(removed);
        removed
    }

    /// 定期回收闲置会话，不会返回
    pub async fn cleanup_task(&self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = self.evict_expired();
            debug!(
                "Session cleanup: {} active, {} removed, {} evicted in total",
                self.session_count(),
                removed,
                self.evicted_count()
            );
        }
    }

    fn evict(&self) {
        self.evict_expired();
        if self.sessions.len() < self.max_sessions {
            return;
        }

        let mut idle: Vec<(String, Instant)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_used()))
            .collect();
        idle.sort_by_key(|(_, last_used)| *last_used);

        let mut removed = 0;
        for (session_id, _) in idle {
            if self.sessions.len() < self.max_sessions {
                break;
            }
            if self
                .sessions
                .remove_if(&session_id, |_, slot| !slot.in_use())
                .is_some()
            {
                removed += 1;
            }
        }
        self.record_evictions(removed);
    }

    fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.evictions.fetch_add(count as u64, Ordering::Relaxed);
            debug!("Evicted {} conversation sessions", count);
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 累计回收的会话数
    pub fn evicted_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Role;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let history = ConversationHistory::new(4);

        history.append("a", ConversationTurn::user("hi from a")).await;
        history.append("b", ConversationTurn::user("hi from b")).await;
        history
            .append("a", ConversationTurn::assistant("hello a"))
            .await;

        let a = history.snapshot("a").await;
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].role, Role::User);
        assert_eq!(a[1].content, "hello a");
        assert_eq!(history.snapshot("b").await.len(), 1);
        assert_eq!(history.session_count(), 2);
    }

    #[tokio::test]
    async fn test_window_bounded() {
        let history = ConversationHistory::new(3);
        for i in 0..7 {
            history
                .append("s", ConversationTurn::user(format!("m{}", i)))
                .await;
        }

        let contents: Vec<String> = history
            .snapshot("s")
            .await
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn test_reset_and_missing_session() {
        let history = ConversationHistory::default();
        assert!(!history.reset("missing").await);
        assert!(history.snapshot("missing").await.is_empty());

        history.append("s", ConversationTurn::user("x")).await;
        assert!(history.reset("s").await);
        assert!(history.snapshot("s").await.is_empty());
        // 清空后的会话不再占用 map
        assert!(history.get("s").is_none());

        history.append("t", ConversationTurn::user("y")).await;
        assert!(history.remove("t"));
        assert!(history.get("t").is_none());
    }

    #[test]
    fn test_session_count_stays_bounded() {
        let history = ConversationHistory::with_limits(10, 5, Duration::from_secs(3600));

        for i in 0..50 {
            let _ = history.session(&format!("anon-{}", i));
        }

        assert!(history.session_count() <= 5);
        assert_eq!(history.evicted_count(), 45);
        assert!(history.get("anon-49").is_some());
    }

    #[test]
    fn test_in_use_sessions_are_not_evicted() {
        let history = ConversationHistory::with_limits(10, 3, Duration::ZERO);
        let pinned = history.session("pinned");

        for i in 0..10 {
            let _ = history.session(&format!("other-{}", i));
        }

        assert!(history.get("pinned").is_some());
        assert!(history.session_count() <= 3);
        drop(pinned);
    }

    #[test]
    fn test_evict_expired_removes_idle_sessions() {
        let history = ConversationHistory::with_limits(10, 100, Duration::ZERO);
        let _ = history.session("a");
        let _ = history.session("b");
        let held = history.session("c");

        assert_eq!(history.evict_expired(), 2);
        assert_eq!(history.session_count(), 1);
        assert!(history.get("c").is_some());
        drop(held);

        let history = ConversationHistory::with_limits(10, 100, Duration::from_secs(3600));
        let _ = history.session("fresh");
        assert_eq!(history.evict_expired(), 0);
    }

    #[tokio::test]
    async fn test_release_only_drops_empty_unused_sessions() {
        let history = ConversationHistory::new(4);

        let handle = history.session("empty");
        assert!(!history.release("empty"));
        drop(handle);
        assert!(history.release("empty"));
        assert_eq!(history.session_count(), 0);

        history.append("kept", ConversationTurn::user("hi")).await;
        assert!(!history.release("kept"));
        assert_eq!(history.snapshot("kept").await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_same_session() {
        let history = Arc::new(ConversationHistory::new(100));

        let mut handles = Vec::new();
        for i in 0..20 {
            let history = Arc::clone(&history);
            handles.push(tokio::spawn(async move {
                history
                    .append("shared", ConversationTurn::user(format!("{}", i)))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(history.snapshot("shared").await.len(), 20);
        assert_eq!(history.session_count(), 1);
    }

    #[test]
    fn test_log_entry_fields() {
        let entry = ConversationLogEntry {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            user_message: "資訊學群是什麼".into(),
            ai_response: "答".into(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        for key in ["timestamp", "session_id", "user_message", "ai_response"] {
            assert!(value.get(key).is_some(), "{}", key);
        }
    }
}
