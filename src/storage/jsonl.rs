//! 追加式 JSON Lines 日志
//!
//! 每条记录一行 JSON，非 ASCII 字符原样写入。写入在进程内串行化，
//! 保证并发请求的行不会交错。

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// 对话日志文件名
pub const CONVERSATION_LOG: &str = "conversation_log.jsonl";
/// 检索日志文件名
pub const RETRIEVAL_LOG: &str = "retrieval_log.jsonl";
/// 指标日志文件名
pub const METRICS_LOG: &str = "metrics_log.jsonl";

#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// 目录为 None 时不建立日志
    pub fn in_dir(dir: Option<&Path>, file_name: &str) -> Option<Arc<Self>> {
        dir.map(|d| Arc::new(Self::new(d.join(file_name))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<T: Serialize + ?Sized>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// 写入失败只记录警告
    pub async fn append_or_warn<T: Serialize + ?Sized>(&self, record: &T) {
        if let Err(e) = self.append(record).await {
            warn!("Failed to write {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlLog::new(dir.path().join("nested").join("log.jsonl"));

        log.append(&json!({"query": "資訊學群是什麼"})).await.unwrap();
        log.append(&json!({"query": "second"})).await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        // 中文不转义
        assert!(lines[0].contains("資訊學群是什麼"));
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["query"], "second");
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(JsonlLog::new(dir.path().join("log.jsonl")));

        let mut handles = Vec::new();
        for i in 0..20 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                log.append(&json!({"n": i, "pad": "x".repeat(512)}))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 20);
        for line in lines {
            assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
        }
    }

    #[test]
    fn test_in_dir_none_disables_log() {
        assert!(JsonlLog::in_dir(None, METRICS_LOG).is_none());
        let log = JsonlLog::in_dir(Some(Path::new("/tmp/edurail")), METRICS_LOG).unwrap();
        assert!(log.path().ends_with(METRICS_LOG));
    }
}
