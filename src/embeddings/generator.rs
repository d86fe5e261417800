use std::sync::Arc;
use std::time::Duration;

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingsConfig;
use crate::embeddings::{Classifier, ContentKind, Embedder, HeuristicClassifier};
use crate::error::{Result, RepoRagError};

/// A vector together with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub kind: ContentKind,
}

/// Classifies text, routes it to the code or prose model and enforces the timeout.
///
/// Failures surface as `None`; callers skip the chunk instead of storing a
/// placeholder vector.
pub struct EmbeddingGenerator {
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn Classifier>,
    code_model: String,
    prose_model: String,
    timeout: Duration,
    cache: Option<Arc<EmbeddingCache>>,
}

impl EmbeddingGenerator {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingsConfig) -> Self {
        Self {
            embedder,
            classifier: Arc::new(HeuristicClassifier),
            code_model: config.code_model.clone(),
            prose_model: config.prose_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            cache: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Cache used by [`embed_query`](Self::embed_query) only
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn classify(&self, text: &str) -> ContentKind {
        self.classifier.classify(text)
    }

    pub fn model_for(&self, kind: ContentKind) -> &str {
        match kind {
            ContentKind::Code => &self.code_model,
            ContentKind::Prose => &self.prose_model,
        }
    }

    pub fn code_model(&self) -> &str {
        &self.code_model
    }

    async fn call(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout(self.timeout, self.embedder.embed(model, text))
            .await
            .map_err(|_| {
                RepoRagError::Embedding(format!("{} timed out after {:?}", model, self.timeout))
            })??;

        if vector.is_empty() {
            return Err(RepoRagError::Embedding(format!("{} returned an empty vector", model)));
        }
        Ok(vector)
    }

    /// Embed one chunk of file content
    pub async fn embed_chunk(&self, text: &str) -> Option<Embedding> {
        let kind = self.classify(text);
        let model = self.model_for(kind).to_string();

        match self.call(&model, text).await {
            Ok(vector) => Some(Embedding { vector, model, kind }),
            Err(e) => {
                log::warn!("Embedding failed ({}): {}", model, e);
                None
            }
        }
    }

    /// Embed a search query, through the LRU cache when one is attached
    pub async fn embed_query(&self, query: &str) -> Option<Embedding> {
        let kind = self.classify(query);
        let model = self.model_for(kind).to_string();

        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get(&model, query) {
                log::debug!("Query embedding cache hit");
                return Some(Embedding { vector, model, kind });
            }
        }

        match self.call(&model, query).await {
            Ok(vector) => {
                if let Some(cache) = &self.cache {
                    cache.put(&model, query, vector.clone());
                }
                Some(Embedding { vector, model, kind })
            }
            Err(e) => {
                log::warn!("Query embedding failed ({}): {}", model, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::test_support::MockEmbedder;

    fn generator(mock: Arc<MockEmbedder>) -> EmbeddingGenerator {
        EmbeddingGenerator::new(mock, &EmbeddingsConfig::default())
    }

    #[tokio::test]
    async fn test_routes_by_content_kind() {
        let mock = Arc::new(MockEmbedder::default());
        let gen = generator(mock.clone());

        let code = gen.embed_chunk("fn login(user: &User) -> bool {").await.unwrap();
        assert_eq!(code.model, "mxbai-embed-large");
        assert_eq!(code.kind, ContentKind::Code);

        let prose = gen.embed_chunk("The login page explains the flow.").await.unwrap();
        assert_eq!(prose.model, "nomic-embed-text");
        assert_eq!(prose.kind, ContentKind::Prose);

        assert_eq!(
            *mock.models.lock().unwrap(),
            vec!["mxbai-embed-large".to_string(), "nomic-embed-text".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_yields_none() {
        let gen = generator(Arc::new(MockEmbedder::default()));
        assert!(gen.embed_chunk("FAIL here").await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_yields_none() {
        let gen = generator(Arc::new(MockEmbedder::default())).with_timeout(Duration::from_millis(50));
        assert!(gen.embed_chunk("SLOW chunk").await.is_none());
    }

    #[tokio::test]
    async fn test_query_cache_avoids_second_call() {
        let mock = Arc::new(MockEmbedder::default());
        let gen = generator(mock.clone()).with_cache(Arc::new(EmbeddingCache::new(8)));

        let first = gen.embed_query("explain login").await.unwrap();
        let second = gen.embed_query("explain login").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.call_count(), 1);
    }

    struct AlwaysCode;

    impl Classifier for AlwaysCode {
        fn classify(&self, _text: &str) -> ContentKind {
            ContentKind::Code
        }
    }

    #[tokio::test]
    async fn test_classifier_is_pluggable() {
        let gen = generator(Arc::new(MockEmbedder::default())).with_classifier(Arc::new(AlwaysCode));
        let e = gen.embed_chunk("plain words").await.unwrap();
        assert_eq!(e.model, "mxbai-embed-large");
    }
}
