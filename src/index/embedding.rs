//! 嵌入模型服务
//!
//! 所有后端都保证：输出顺序与输入一致、每个向量维度固定、批次划分对调用方不可见。
//! 计算密集的本地后端通过 [`BlockingEmbeddingModel`] 在 tokio 阻塞线程池上执行。

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE as BERT_DTYPE};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::config::EmbeddingConfig;
use crate::error::AppError;

/// 编码错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodingError {
    /// 文本无法分词
    #[error("text #{index} cannot be tokenized: {reason}")]
    Untokenizable { index: usize, reason: String },

    /// 模型输出维度与配置不一致
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// 模型推理失败
    #[error("model inference failed: {0}")]
    Model(String),

    /// 后端不可用（远程服务、工作线程等）
    #[error("embedding backend unavailable: {0}")]
    Backend(String),
}

impl EncodingError {
    fn at(self, index: usize) -> Self {
        match self {
            Self::Untokenizable { reason, .. } => Self::Untokenizable { index, reason },
            other => other,
        }
    }
}

impl From<candle_core::Error> for EncodingError {
    fn from(e: candle_core::Error) -> Self {
        EncodingError::Model(e.to_string())
    }
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let mut vectors = self.encode_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EncodingError::Backend("encoder returned no vector".to_string()))
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodingError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// 同步文本编码器，由 [`BlockingEmbeddingModel`] 负责调度到阻塞线程池
pub trait TextEncoder: Send + Sync + 'static {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EncodingError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// 将同步编码器包装为异步 [`EmbeddingModel`]
///
/// 每个批次在 `spawn_blocking` 中执行；批次内逐条编码，
/// 因此结果与批次大小无关。
pub struct BlockingEmbeddingModel<E> {
    inner: Arc<E>,
    batch_size: usize,
}

impl<E: TextEncoder> BlockingEmbeddingModel<E> {
    pub fn new(inner: E, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<E: TextEncoder> EmbeddingModel for BlockingEmbeddingModel<E> {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodingError> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (batch_index, chunk) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_index * self.batch_size;
            let owned: Vec<String> = chunk.iter().map(|t| t.to_string()).collect();
            let encoder = Arc::clone(&self.inner);

            let embeddings = tokio::task::spawn_blocking(move || {
                let expected = encoder.dimension();
                owned
                    .iter()
                    .enumerate()
                    .map(|(i, text)| {
                        let vector = encoder.encode_text(text).map_err(|e| e.at(offset + i))?;
                        if vector.len() != expected {
                            return Err(EncodingError::DimensionMismatch {
                                expected,
                                got: vector.len(),
                            });
                        }
                        Ok(vector)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
            .map_err(|e| EncodingError::Backend(format!("encoder worker failed: {}", e)))??;

            all_embeddings.extend(embeddings);
        }

        if texts.len() > self.batch_size {
            debug!(
                "Encoded {} texts with {} in batches of {}",
                texts.len(),
                self.inner.name(),
                self.batch_size
            );
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// 字符 n-gram 特征哈希编码器
///
/// 单字与相邻双字各映射到一个桶，计数后做 L2 归一化。拉丁字母先转小写，
/// 中文字符各自成为一个词元。只有标点或空白的文本得到零向量。
pub struct HashingEncoder {
    dimension: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, chars: &[char]) -> usize {
        let mut hash = FNV_OFFSET;
        let mut buf = [0u8; 4];
        for c in chars {
            for byte in c.encode_utf8(&mut buf).bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            // 字符边界
            hash ^= 0xff;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl TextEncoder for HashingEncoder {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        if let Some(c) = text.chars().find(|c| c.is_control() && !c.is_whitespace()) {
            return Err(EncodingError::Untokenizable {
                index: 0,
                reason: format!("control character U+{:04X}", c as u32),
            });
        }

        let mut vector = vec![0.0f32; self.dimension];
        let mut previous: Option<char> = None;

        for c in text.chars().flat_map(char::to_lowercase) {
            if !c.is_alphanumeric() {
                previous = None;
                continue;
            }
            vector[self.bucket(&[c])] += 1.0;
            if let Some(p) = previous {
                vector[self.bucket(&[p, c])] += 1.0;
            }
            previous = Some(c);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vector {
                *val /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// 本地 BERT 编码器（candle），对最后一层隐藏状态做平均池化
pub struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    model_name: String,
}

/// BERT 最大输入长度
const BERT_MAX_TOKENS: usize = 512;

impl BertEncoder {
    /// 从模型目录载入，目录需包含 config.json、tokenizer.json、model.safetensors
    pub fn load(model_dir: &Path, model_name: &str, use_gpu: bool) -> Result<Self, EncodingError> {
        let device = if use_gpu {
            Device::cuda_if_available(0)?
        } else {
            Device::Cpu
        };

        let config_text = std::fs::read_to_string(model_dir.join("config.json"))
            .map_err(|e| EncodingError::Backend(format!("config.json: {}", e)))?;
        let config: BertConfig = serde_json::from_str(&config_text)
            .map_err(|e| EncodingError::Backend(format!("config.json: {}", e)))?;
        let dimension = serde_json::from_str::<serde_json::Value>(&config_text)
            .ok()
            .and_then(|v| v.get("hidden_size").and_then(|h| h.as_u64()))
            .ok_or_else(|| EncodingError::Backend("config.json: missing hidden_size".into()))?
            as usize;

        let tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| EncodingError::Backend(format!("tokenizer.json: {}", e)))?;

        let weights = model_dir.join("model.safetensors");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], BERT_DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        info!(
            "BERT encoder loaded: {} (dimension {}, device {:?})",
            model_name, dimension, device
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
            model_name: model_name.to_string(),
        })
    }
}

impl TextEncoder for BertEncoder {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EncodingError::Untokenizable {
                index: 0,
                reason: e.to_string(),
            })?;

        let mut ids = encoding.get_ids().to_vec();
        let mut type_ids = encoding.get_type_ids().to_vec();
        if ids.is_empty() {
            return Err(EncodingError::Untokenizable {
                index: 0,
                reason: "tokenizer produced no tokens".into(),
            });
        }
        if ids.len() > BERT_MAX_TOKENS {
            // 保留结尾的 [SEP]
            let last = ids[ids.len() - 1];
            ids.truncate(BERT_MAX_TOKENS - 1);
            ids.push(last);
            type_ids.truncate(BERT_MAX_TOKENS);
        }

        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(type_ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&input_ids, &token_type_ids)?;
        let pooled = hidden
            .mean(1)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        Ok(pooled)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Ollama Embedding 模型客户端
pub struct OllamaEmbeddingModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    dimension: usize,
    batch_size: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EncodingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ollama_timeout))
            .build()
            .map_err(|e| EncodingError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            model_name: config.model_name.clone(),
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodingError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "input": texts,
                "truncate": true
            }))
            .send()
            .await
            .map_err(|e| EncodingError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EncodingError::Backend(format!(
                "Ollama embedding failed ({}): {}",
                status, error_text
            )));
        }

        let embed_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EncodingError::Backend(e.to_string()))?;

        if embed_response.embeddings.len() != texts.len() {
            return Err(EncodingError::Backend(format!(
                "Ollama returned {} embeddings for {} inputs",
                embed_response.embeddings.len(),
                texts.len()
            )));
        }

        Ok(embed_response.embeddings)
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddingModel {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EncodingError> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.embed(chunk).await?;
            if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
                return Err(EncodingError::DimensionMismatch {
                    expected: self.dimension,
                    got: bad.len(),
                });
            }
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

pub async fn create_embedding_model(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingModel>, AppError> {
    match config.backend.as_str() {
        "bert" => {
            let model_dir = config.model_path.clone().ok_or_else(|| {
                AppError::Config("embedding.model_path is required for the bert backend".into())
            })?;
            let model_name = config.model_name.clone();
            let use_gpu = config.use_gpu;
            let encoder = tokio::task::spawn_blocking(move || {
                BertEncoder::load(&model_dir, &model_name, use_gpu)
            })
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;

            if encoder.dimension() != config.dimension {
                return Err(AppError::Config(format!(
                    "embedding.dimension is {} but the model produces {}",
                    config.dimension,
                    encoder.dimension()
                )));
            }
            Ok(Arc::new(BlockingEmbeddingModel::new(
                encoder,
                config.batch_size,
            )))
        }
        "ollama" => Ok(Arc::new(OllamaEmbeddingModel::new(config)?)),
        "hashing" => Ok(Arc::new(BlockingEmbeddingModel::new(
            HashingEncoder::new(config.dimension),
            config.batch_size,
        ))),
        other => Err(AppError::Config(format!(
            "unknown embedding backend: {}",
            other
        ))),
    }
}
