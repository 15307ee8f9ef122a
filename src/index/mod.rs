//! 索引模块

pub mod embedding;
pub mod vector;

pub use embedding::{
    BertEncoder, BlockingEmbeddingModel, EmbeddingModel, EncodingError, HashingEncoder,
    OllamaEmbeddingModel, TextEncoder, create_embedding_model,
};
pub use vector::{FlatVectorIndex, VectorSearchResult, cosine_similarity};
