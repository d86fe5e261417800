pub mod hybrid;
pub mod lexical;
pub mod vector;

use serde::Serialize;

pub use hybrid::{rank_chunks, HybridWeights, Retriever};
pub use vector::cosine_similarity;

/// One ranked chunk as returned by the retrieval API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Repository-relative path of the originating file
    pub file: String,
    pub content: String,
    pub score: f32,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub start_line: usize,
    pub chunk_index: usize,
    pub model: String,
}
