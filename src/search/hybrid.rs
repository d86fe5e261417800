use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::db::Db;
use crate::embeddings::{load_repo_chunks, ContentKind, Embedding, EmbeddingGenerator, StoredChunk};
use crate::error::Result;
use crate::search::lexical::{lexical_score, query_terms};
use crate::search::vector::cosine_similarity;
use crate::search::RetrievedChunk;

/// Weights for combining the two signals
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    pub vector: f32,
    pub lexical: f32,
    /// Multiplier when a code-like query meets a chunk embedded by the code model
    pub code_boost: f32,
}

impl From<&SearchConfig> for HybridWeights {
    fn from(config: &SearchConfig) -> Self {
        Self {
            vector: config.vector_weight,
            lexical: config.lexical_weight,
            code_boost: config.code_boost,
        }
    }
}

/// Score every chunk against the query and keep the best `k`.
///
/// The sort is stable, so equal scores keep insertion order and repeated calls
/// return the same ranking.
pub fn rank_chunks(
    chunks: Vec<StoredChunk>,
    query: &Embedding,
    terms: &[String],
    code_model: &str,
    weights: HybridWeights,
    k: usize,
) -> Vec<RetrievedChunk> {
    let mut scored: Vec<RetrievedChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let vector_score = cosine_similarity(&query.vector, &chunk.embedding);
            let lexical = lexical_score(terms, &chunk.content);
            let boost = if query.kind == ContentKind::Code && chunk.model == code_model {
                weights.code_boost
            } else {
                1.0
            };
            let score = (vector_score * weights.vector + lexical * weights.lexical) * boost;

            RetrievedChunk {
                file: chunk.file_path,
                content: chunk.content,
                score,
                vector_score,
                lexical_score: lexical,
                start_line: chunk.start_line,
                chunk_index: chunk.chunk_index,
                model: chunk.model,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

/// Query-time half of the engine: embed, scan, score.
pub struct Retriever {
    db: Db,
    generator: Arc<EmbeddingGenerator>,
    weights: HybridWeights,
    default_k: usize,
}

impl Retriever {
    pub fn new(db: Db, generator: Arc<EmbeddingGenerator>, config: &SearchConfig) -> Self {
        Self {
            db,
            generator,
            weights: HybridWeights::from(config),
            default_k: config.default_k,
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Top-`k` chunks of a repository for `query` (`None` uses the configured default).
    ///
    /// Read-only. An empty list means nothing relevant: no chunks, a blank query or a
    /// failed query embedding.
    pub async fn retrieve(&self, repository_id: &str, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        let k = k.unwrap_or(self.default_k);
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let chunks = load_repo_chunks(&self.db, repository_id).await?;
        if chunks.is_empty() {
            log::debug!("Repository {} has no indexed chunks", repository_id);
            return Ok(Vec::new());
        }

        let Some(query_embedding) = self.generator.embed_query(query).await else {
            return Ok(Vec::new());
        };
        let embed_elapsed = started.elapsed();

        let total = chunks.len();
        let results = rank_chunks(
            chunks,
            &query_embedding,
            &query_terms(query),
            self.generator.code_model(),
            self.weights,
            k,
        );
        log::debug!(
            "Retrieved {} of {} chunks for {} in {:?} (embedding {:?}, model {})",
            results.len(),
            total,
            repository_id,
            started.elapsed(),
            embed_elapsed,
            query_embedding.model
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingsConfig;
    use crate::db::repos::create_repository;
    use crate::db::test_support::setup_test_db;
    use crate::embeddings::test_support::MockEmbedder;
    use crate::ingest::db_writer::{replace_file, ChunkWrite, FileWrite};
    use crate::ingest::digest::digest;

    fn weights() -> HybridWeights {
        HybridWeights::from(&SearchConfig::default())
    }

    fn stored(id: i64, path: &str, content: &str, embedding: Vec<f32>, model: &str) -> StoredChunk {
        StoredChunk {
            id,
            file_path: path.to_string(),
            chunk_index: 0,
            content: content.to_string(),
            start_line: 1,
            embedding,
            model: model.to_string(),
        }
    }

    fn query(vector: Vec<f32>, kind: ContentKind) -> Embedding {
        let model = match kind {
            ContentKind::Code => "mxbai-embed-large",
            ContentKind::Prose => "nomic-embed-text",
        };
        Embedding {
            vector,
            model: model.to_string(),
            kind,
        }
    }

    #[test]
    fn test_hybrid_score_combines_both_signals() {
        let chunks = vec![
            stored(1, "a.js", "function login(user) {}", vec![1.0, 0.0], "nomic-embed-text"),
            stored(2, "b.js", "unrelated", vec![0.0, 1.0], "nomic-embed-text"),
        ];
        let q = query(vec![1.0, 0.0], ContentKind::Prose);
        let results = rank_chunks(chunks, &q, &query_terms("explain login"), "mxbai-embed-large", weights(), 6);

        assert_eq!(results[0].file, "a.js");
        // 1.0 * 0.7 + 0.5 * 0.3
        assert!((results[0].score - 0.85).abs() < 1e-4);
        assert!((results[0].vector_score - 1.0).abs() < 1e-4);
        assert_eq!(results[0].lexical_score, 0.5);
        assert!(results[1].score.abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_embedding_ranks_last() {
        let chunks = vec![
            stored(1, "broken.js", "x", vec![f32::NAN, 0.0], "nomic-embed-text"),
            stored(2, "ok.js", "x", vec![1.0, 0.0], "nomic-embed-text"),
            stored(3, "weak.js", "x", vec![1.0, 1.0], "nomic-embed-text"),
        ];
        let q = query(vec![1.0, 0.0], ContentKind::Prose);
        let results = rank_chunks(chunks, &q, &query_terms("login"), "mxbai-embed-large", weights(), 6);

        let files: Vec<&str> = results.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["ok.js", "weak.js", "broken.js"]);
        assert!(results.iter().all(|r| r.score.is_finite()));
    }

    #[test]
    fn test_code_boost_needs_code_query_and_code_model() {
        let chunks = vec![
            stored(1, "prose.md", "x", vec![1.0, 0.0], "nomic-embed-text"),
            stored(2, "code.rs", "x", vec![1.0, 0.0], "mxbai-embed-large"),
        ];

        let code_q = query(vec![1.0, 0.0], ContentKind::Code);
        let results = rank_chunks(chunks.clone(), &code_q, &[], "mxbai-embed-large", weights(), 6);
        assert_eq!(results[0].file, "code.rs");
        assert!((results[0].score - 0.7 * 1.2).abs() < 1e-4);
        assert!((results[1].score - 0.7).abs() < 1e-4);

        let prose_q = query(vec![1.0, 0.0], ContentKind::Prose);
        let results = rank_chunks(chunks, &prose_q, &[], "mxbai-embed-large", weights(), 6);
        // no boost: tie, insertion order wins
        assert_eq!(results[0].file, "prose.md");
        assert_eq!(results[0].score, results[1].score);
    }

    #[test]
    fn test_ranking_is_stable_and_truncated() {
        let chunks: Vec<StoredChunk> = (0..10)
            .map(|i| stored(i, &format!("f{}.rs", i), "same", vec![1.0, 1.0], "nomic-embed-text"))
            .collect();
        let q = query(vec![1.0, 1.0], ContentKind::Prose);

        let first = rank_chunks(chunks.clone(), &q, &[], "mxbai-embed-large", weights(), 3);
        let second = rank_chunks(chunks, &q, &[], "mxbai-embed-large", weights(), 3);

        let files: Vec<&str> = first.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["f0.rs", "f1.rs", "f2.rs"]);
        assert_eq!(first, second);
    }

    async fn indexed_retriever() -> (Retriever, String, Arc<MockEmbedder>, tempfile::TempDir) {
        let (db, temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();

        let docs = [
            ("src/auth.js", "function login(user) { return check(user) }"),
            ("README.md", "Project overview and setup instructions"),
            ("src/db.js", "const pool = createPool(config)"),
        ];
        for (path, content) in docs {
            replace_file(
                &db,
                &repo.id,
                FileWrite {
                    path: path.to_string(),
                    extension: String::new(),
                    content: content.to_string(),
                    digest: digest(content.as_bytes()),
                    tokens: 1,
                },
                vec![ChunkWrite {
                    chunk_index: 0,
                    content: content.to_string(),
                    start_line: 1,
                    embedding: MockEmbedder::vector_for(content),
                    model: "nomic-embed-text".to_string(),
                    digest: digest(content.as_bytes()),
                    tokens: 1,
                }],
            )
            .await
            .unwrap();
        }

        let embedder = Arc::new(MockEmbedder::default());
        let generator = EmbeddingGenerator::new(embedder.clone(), &EmbeddingsConfig::default());
        let retriever = Retriever::new(db, Arc::new(generator), &SearchConfig::default());
        (retriever, repo.id, embedder, temp_dir)
    }

    #[tokio::test]
    async fn test_relevant_chunk_ranks_first() {
        let (retriever, repo_id, _embedder, _temp_dir) = indexed_retriever().await;

        let results = retriever.retrieve(&repo_id, "explain login", None).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].file, "src/auth.js");
        assert!(results[0].vector_score > 0.0);
        assert_eq!(results[0].lexical_score, 0.5);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_repeated_retrieval_is_identical() {
        let (retriever, repo_id, _embedder, _temp_dir) = indexed_retriever().await;

        let a = retriever.retrieve(&repo_id, "pool config", Some(2)).await.unwrap();
        let b = retriever.retrieve(&repo_id, "pool config", Some(2)).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_empty_repository_returns_nothing() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "empty").await.unwrap();
        let embedder = Arc::new(MockEmbedder::default());
        let generator = EmbeddingGenerator::new(embedder.clone(), &EmbeddingsConfig::default());
        let retriever = Retriever::new(db, Arc::new(generator), &SearchConfig::default());

        let results = retriever.retrieve(&repo.id, "explain login", None).await.unwrap();
        assert!(results.is_empty());
        // nothing to score against, so the query is never embedded
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_query_embedding_returns_nothing() {
        let (retriever, repo_id, _embedder, _temp_dir) = indexed_retriever().await;
        assert!(retriever.retrieve(&repo_id, "FAIL login", None).await.unwrap().is_empty());
        assert!(retriever.retrieve(&repo_id, "   ", None).await.unwrap().is_empty());
    }
}
