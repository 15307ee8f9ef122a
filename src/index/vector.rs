//! 向量索引服务
//!
//! 语料在启动时一次性载入，之后只读，因此索引是一个不需要锁的扁平数组。

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// 记录在索引中的位置（即语料记录 id）
    pub id: usize,
    pub score: f32,
}

/// 余弦相似度；任一向量为零向量时定义为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 分数降序，同分按 id 升序
fn rank_order(a: &VectorSearchResult, b: &VectorSearchResult) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// 不可变的扁平向量索引
#[derive(Debug, Clone, Default)]
pub struct FlatVectorIndex {
    vectors: Vec<Vec<f32>>,
    dimension: usize,
}

impl FlatVectorIndex {
    /// 建立索引；所有向量维度必须等于 `dimension`
    pub fn new(vectors: Vec<Vec<f32>>, dimension: usize) -> Result<Self> {
        if let Some((id, bad)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != dimension)
        {
            return Err(AppError::Config(format!(
                "vector {} has dimension {}, expected {}",
                id,
                bad.len(),
                dimension
            )));
        }

        Ok(Self { vectors, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// 返回前 `limit` 个结果（不足时返回全部），按分数降序、id 升序
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorSearchResult>> {
        if query.len() != self.dimension {
            return Err(AppError::Retrieval(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut results: Vec<_> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| VectorSearchResult {
                id,
                score: cosine_similarity(query, vector),
            })
            .collect();

        results.sort_by(rank_order);
        results.truncate(limit);

        Ok(results)
    }
}
