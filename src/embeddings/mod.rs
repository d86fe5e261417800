pub mod classify;
pub mod generator;
pub mod ollama;
pub mod storage;

use async_trait::async_trait;

use crate::error::Result;

pub use classify::{Classifier, ContentKind, HeuristicClassifier};
pub use generator::{Embedding, EmbeddingGenerator};
pub use ollama::OllamaEmbedder;
pub use storage::{decode_embedding, encode_embedding, load_repo_chunks, StoredChunk};

/// Embedding service boundary: (model, text) -> vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;
}
