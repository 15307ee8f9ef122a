//! 学群知识库
//!
//! 启动时读取 CSV、一次性编码全部记录，之后只读。

use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::config::config::CorpusConfig;
use crate::error::{AppError, Result};
use crate::index::{EmbeddingModel, FlatVectorIndex};
use crate::models::corpus::{CorpusEntry, CorpusRecord, RetrievalResult};

/// 只读语料库：记录与向量按 id 一一对应
#[derive(Debug, Default)]
pub struct CorpusStore {
    records: Vec<CorpusRecord>,
    index: FlatVectorIndex,
}

impl CorpusStore {
    /// 读取并编码 CSV；任何失败都视为致命错误
    pub async fn load(config: &CorpusConfig, encoder: &dyn EmbeddingModel) -> Result<Self> {
        let entries = Self::read_entries(&config.path)?;
        info!(
            "Loaded {} corpus rows from {}",
            entries.len(),
            config.path.display()
        );

        Self::build(
            entries,
            encoder,
            config.include_related_groups,
            config.include_link,
        )
        .await
    }

    /// 读取 CSV 文件（允许 UTF-8 BOM）
    pub fn read_entries(path: &Path) -> Result<Vec<CorpusEntry>> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::Corpus(format!("{}: {}", path.display(), e)))?;
        Self::parse_entries(bytes.as_slice())
    }

    pub fn parse_entries<R: Read>(mut reader: R) -> Result<Vec<CorpusEntry>> {
        let mut content = String::new();
        reader
            .read_to_string(&mut content)
            .map_err(|e| AppError::Corpus(format!("corpus is not valid UTF-8: {}", e)))?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(content.as_bytes());

        let mut entries = Vec::new();
        for (row, result) in csv_reader.deserialize::<CorpusEntry>().enumerate() {
            let entry =
                result.map_err(|e| AppError::Corpus(format!("row {}: {}", row + 1, e)))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// 编码所有组合文本并建立索引
    pub async fn build(
        entries: Vec<CorpusEntry>,
        encoder: &dyn EmbeddingModel,
        include_related_groups: bool,
        include_link: bool,
    ) -> Result<Self> {
        let texts: Vec<String> = entries
            .iter()
            .map(|e| e.composite_text(include_related_groups, include_link))
            .collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        info!("Encoding {} corpus documents with {}", texts.len(), encoder.name());
        let vectors = encoder
            .encode_batch(&text_refs)
            .await
            .map_err(|e| AppError::Corpus(format!("failed to encode corpus: {}", e)))?;

        if vectors.len() != entries.len() {
            return Err(AppError::Corpus(format!(
                "encoder returned {} vectors for {} records",
                vectors.len(),
                entries.len()
            )));
        }

        let index = FlatVectorIndex::new(vectors, encoder.dimension())?;
        let records = entries
            .into_iter()
            .enumerate()
            .map(|(id, entry)| entry.into_record(id))
            .collect();

        info!("Corpus ready: {} records, dimension {}", index.len(), index.dimension());
        Ok(Self { records, index })
    }

    /// 空语料库
    pub fn empty(dimension: usize) -> Self {
        Self {
            records: Vec::new(),
            index: FlatVectorIndex::new(Vec::new(), dimension).unwrap_or_default(),
        }
    }

    pub fn get(&self, id: usize) -> Option<&CorpusRecord> {
        self.records.get(id)
    }

    pub fn embedding(&self, id: usize) -> Option<&[f32]> {
        self.index.get(id)
    }

    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// 以已编码的查询向量检索前 `k` 笔
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let hits = self.index.search(query, k)?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                self.get(hit.id)
                    .map(|record| RetrievalResult::from_record(record, hit.score))
            })
            .collect())
    }
}
