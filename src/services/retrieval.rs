//! 检索服务
//!
//! 查询编码与排序拆成两步，方便编排器分别追踪阶段。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::index::EmbeddingModel;
use crate::models::corpus::RetrievalResult;
use crate::storage::{CorpusStore, JsonlLog};

/// 检索日志中的一行
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalLogEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub results: Vec<String>,
    pub scores: Vec<f32>,
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// 编码查询文本
    async fn encode_query(&self, query: &str) -> Result<Vec<f32>>;

    /// 以已编码的查询向量排序，返回前 `k` 笔
    async fn rank(
        &self,
        query: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>>;

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let vector = self.encode_query(query).await?;
        self.rank(query, &vector, k).await
    }

    fn corpus_size(&self) -> usize;
}

pub struct CorpusRetriever {
    corpus: Arc<CorpusStore>,
    encoder: Arc<dyn EmbeddingModel>,
    log: Option<Arc<JsonlLog>>,
}

impl CorpusRetriever {
    pub fn new(
        corpus: Arc<CorpusStore>,
        encoder: Arc<dyn EmbeddingModel>,
        log: Option<Arc<JsonlLog>>,
    ) -> Self {
        Self {
            corpus,
            encoder,
            log,
        }
    }
}

#[async_trait]
impl RetrievalService for CorpusRetriever {
    async fn encode_query(&self, query: &str) -> Result<Vec<f32>> {
        self.encoder
            .encode(query)
            .await
            .map_err(|e| AppError::Retrieval(format!("failed to encode query: {}", e)))
    }

    async fn rank(
        &self,
        query: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let results = self.corpus.search(query_vector, k)?;

        debug!(
            "Retrieved {} of {} records, best score {:?}",
            results.len(),
            self.corpus.len(),
            results.first().map(|r| r.similarity_score)
        );

        if let Some(log) = &self.log {
            let entry = RetrievalLogEntry {
                timestamp: Utc::now(),
                query: query.to_string(),
                results: results.iter().map(|r| r.group_name.clone()).collect(),
                scores: results.iter().map(|r| r.similarity_score).collect(),
            };
            log.append_or_warn(&entry).await;
        }

        Ok(results)
    }

    fn corpus_size(&self) -> usize {
        self.corpus.len()
    }
}

pub fn create_retrieval_service(
    corpus: Arc<CorpusStore>,
    encoder: Arc<dyn EmbeddingModel>,
    log: Option<Arc<JsonlLog>>,
) -> Arc<dyn RetrievalService> {
    Arc::new(CorpusRetriever::new(corpus, encoder, log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BlockingEmbeddingModel, HashingEncoder};
    use crate::models::corpus::CorpusEntry;
    use crate::storage::RETRIEVAL_LOG;

    fn encoder() -> Arc<dyn EmbeddingModel> {
        Arc::new(BlockingEmbeddingModel::new(HashingEncoder::new(256), 4))
    }

    async fn store(encoder: &Arc<dyn EmbeddingModel>) -> Arc<CorpusStore> {
        let entries = vec![
            CorpusEntry::new("資訊學群", "資訊科技與電腦科學", "程式設計"),
            CorpusEntry::new("醫藥衛生學群", "醫學與護理", "解剖學"),
            CorpusEntry::new("管理學群", "企業管理", "會計學"),
            CorpusEntry::new("藝術學群", "視覺藝術", "素描"),
        ];
        Arc::new(
            CorpusStore::build(entries, encoder.as_ref(), false, false)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_retrieve_sorted_and_bounded() {
        let encoder = encoder();
        let retriever = CorpusRetriever::new(store(&encoder).await, encoder, None);

        let results = retriever.retrieve("資訊學群是什麼", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].group_name, "資訊學群");
        for pair in results.windows(2) {
            assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }

        let all = retriever.retrieve("資訊", 10).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let retriever =
            CorpusRetriever::new(Arc::new(CorpusStore::empty(256)), encoder(), None);
        assert!(retriever.retrieve("任何問題", 3).await.unwrap().is_empty());
        assert_eq!(retriever.corpus_size(), 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_is_retrieval_error() {
        let encoder = encoder();
        let retriever = CorpusRetriever::new(store(&encoder).await, encoder, None);
        let err = retriever.retrieve("bad\u{1}input", 3).await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_retrieval_error() {
        let encoder = encoder();
        let retriever = CorpusRetriever::new(store(&encoder).await, encoder, None);
        let err = retriever.rank("q", &[1.0, 0.0], 3).await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_retrieval_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = encoder();
        let log = JsonlLog::in_dir(Some(dir.path()), RETRIEVAL_LOG);
        let retriever = CorpusRetriever::new(store(&encoder).await, encoder, log);

        retriever.retrieve("管理", 2).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(RETRIEVAL_LOG)).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["query"], "管理");
        assert_eq!(line["results"].as_array().unwrap().len(), 2);
        assert_eq!(line["scores"].as_array().unwrap().len(), 2);
        assert!(line["timestamp"].is_string());
    }
}
