use crate::error::Result;
use crate::types::{ChunkId, ModelCompression, SearchResult};

/// Embedding-model collaborator.
///
/// Vectors must be L2-normalized and `dim()` long. `embedder_id` identifies the
/// model and its configuration; an index only accepts queries from the same id.
pub trait Embedder: Send + Sync {
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Nearest-neighbor store over normalized vectors, ranked by inner product.
pub trait VectorStore: Send + Sync {
    fn dim(&self) -> usize;
    fn count(&self) -> usize;
    /// Appends rows in order. Either every row is added or none is.
    fn add(&mut self, ids: &[ChunkId], vectors: &[Vec<f32>]) -> Result<()>;
    /// Top `k` rows as `(id, score)`, highest score first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>>;
    /// Keeps only rows whose id satisfies `keep`; returns how many were dropped.
    fn retain(&mut self, keep: &dyn Fn(ChunkId) -> bool) -> usize;
}

/// Compression-model collaborator. Input length is bounded by the model;
/// callers split longer texts before calling.
pub trait CompressionModel: Send + Sync {
    fn model_id(&self) -> &str;
    fn compress(
        &self,
        text: &str,
        rate: f32,
        force_tokens: &[String],
    ) -> anyhow::Result<ModelCompression>;
}

pub trait Retriever: Send + Sync {
    fn search(&self, query: &str, k: usize, min_score: f32) -> Result<Vec<SearchResult>>;
}
