//! Question answering over an indexed repository: retrieve, compose, stream.

pub mod llm;
pub mod prompt;
pub mod stream;

use std::sync::Arc;

use crate::db::repos::{get_repository, RepoStatus, Repository};
use crate::db::Db;
use crate::error::{RepoRagError, Result};
use crate::search::{RetrievedChunk, Retriever};

pub use llm::{ChatModel, ChatStream, OllamaChat};
pub use prompt::{compose_prompt, PromptOptions, REFUSAL};
pub use stream::{stream_answer, ChannelSink, CollectingSink, StreamReport, TokenSink};

/// What a question turns into before inference
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// Nothing relevant was retrieved; the answer is the refusal sentence
    Refusal,
    Prompt {
        prompt: String,
        sources: Vec<RetrievedChunk>,
    },
}

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub sources: Vec<RetrievedChunk>,
    pub refused: bool,
    pub report: StreamReport,
}

/// The ask pipeline bound to one store, retriever and chat model
#[derive(Clone)]
pub struct Assistant {
    db: Db,
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatModel>,
    options: PromptOptions,
}

impl Assistant {
    pub fn new(db: Db, retriever: Arc<Retriever>, chat: Arc<dyn ChatModel>, options: PromptOptions) -> Self {
        Self {
            db,
            retriever,
            chat,
            options,
        }
    }

    /// The repository, if it exists and is safe to query
    pub async fn require_ready(&self, repository_id: &str) -> Result<Repository> {
        let repo = get_repository(&self.db, repository_id)
            .await?
            .ok_or_else(|| RepoRagError::NotFound(format!("repository {}", repository_id)))?;
        if repo.status != RepoStatus::Ready {
            return Err(RepoRagError::InvalidInput(format!(
                "repository {} is {}, not ready",
                repo.full_name, repo.status
            )));
        }
        Ok(repo)
    }

    pub async fn prepare(&self, repository_id: &str, question: &str) -> Result<Prepared> {
        if question.trim().is_empty() {
            return Err(RepoRagError::InvalidInput("question must not be empty".to_string()));
        }
        self.require_ready(repository_id).await?;

        let sources = self.retriever.retrieve(repository_id, question, None).await?;
        if sources.is_empty() {
            log::info!("No context retrieved for {}; refusing", repository_id);
            return Ok(Prepared::Refusal);
        }

        let prompt = compose_prompt(question, &sources, self.options);
        Ok(Prepared::Prompt { prompt, sources })
    }

    /// Answer `question` into `sink`.
    ///
    /// Errors only for an unknown or unready repository, a blank question or a store
    /// failure. Inference failures reach the sink as an `[ERROR: ...]` token.
    pub async fn ask<S: TokenSink + ?Sized>(&self, repository_id: &str, question: &str, sink: &mut S) -> Result<AskOutcome> {
        let (prompt, sources) = match self.prepare(repository_id, question).await? {
            Prepared::Refusal => {
                sink.token(REFUSAL);
                sink.done();
                return Ok(AskOutcome {
                    sources: Vec::new(),
                    refused: true,
                    report: StreamReport {
                        forwarded: 1,
                        ..StreamReport::default()
                    },
                });
            }
            Prepared::Prompt { prompt, sources } => (prompt, sources),
        };

        let report = match self.chat.chat_stream(&prompt).await {
            Ok(stream) => stream_answer(stream, sink).await,
            Err(e) => {
                log::warn!("Inference request failed: {}", e);
                sink.token(&format!("[ERROR: {}]", e));
                sink.done();
                StreamReport {
                    forwarded: 0,
                    dropped_duplicates: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        Ok(AskOutcome {
            sources,
            refused: false,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingsConfig, SearchConfig};
    use crate::db::repos::{create_repository, mark_ready};
    use crate::db::test_support::setup_test_db;
    use crate::embeddings::test_support::MockEmbedder;
    use crate::embeddings::EmbeddingGenerator;
    use crate::ingest::db_writer::{replace_file, ChunkWrite, FileWrite};
    use crate::ingest::digest::digest;
    use crate::rag::llm::test_support::ScriptedChat;

    async fn index_file(db: &Db, repo_id: &str, path: &str, content: &str) {
        replace_file(
            db,
            repo_id,
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

    fn assistant(db: &Db, chat: Arc<ScriptedChat>) -> Assistant {
        let generator = EmbeddingGenerator::new(Arc::new(MockEmbedder::default()), &EmbeddingsConfig::default());
        let retriever = Retriever::new(db.clone(), Arc::new(generator), &SearchConfig::default());
        Assistant::new(db.clone(), Arc::new(retriever), chat, PromptOptions::default())
    }

    #[tokio::test]
    async fn test_answers_from_retrieved_context() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();
        index_file(&db, &repo.id, "src/auth.js", "function login(user) { return check(user) }").await;
        mark_ready(&db, &repo.id, 1, 1).await.unwrap();

        let chat = Arc::new(ScriptedChat::new(&["Login ", "checks ", "the user."]));
        let assistant = assistant(&db, chat.clone());
        let mut sink = CollectingSink::default();

        let outcome = assistant.ask(&repo.id, "explain login", &mut sink).await.unwrap();

        assert!(!outcome.refused);
        assert_eq!(outcome.sources[0].file, "src/auth.js");
        assert_eq!(sink.text(), "Login checks the user.");
        assert!(sink.finished);

        let prompt = chat.last_prompt().unwrap();
        assert!(prompt.contains("FILE: src/auth.js"));
        assert!(prompt.contains("explain login"));
    }

    #[tokio::test]
    async fn test_empty_index_refuses_without_inference() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "empty").await.unwrap();
        mark_ready(&db, &repo.id, 0, 0).await.unwrap();

        let chat = Arc::new(ScriptedChat::new(&["should not be used"]));
        let assistant = assistant(&db, chat.clone());
        let mut sink = CollectingSink::default();

        let outcome = assistant.ask(&repo.id, "explain login", &mut sink).await.unwrap();

        assert!(outcome.refused);
        assert_eq!(sink.text(), REFUSAL);
        assert!(sink.finished);
        assert!(chat.last_prompt().is_none());
    }

    #[tokio::test]
    async fn test_requires_ready_repository() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "pending").await.unwrap();
        let assistant = assistant(&db, Arc::new(ScriptedChat::new(&[])));
        let mut sink = CollectingSink::default();

        let err = assistant.ask(&repo.id, "anything", &mut sink).await.unwrap_err();
        assert!(matches!(err, RepoRagError::InvalidInput(_)));

        let err = assistant.ask("no-such-id", "anything", &mut sink).await.unwrap_err();
        assert!(matches!(err, RepoRagError::NotFound(_)));
        assert!(sink.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_model_reports_error_token() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();
        index_file(&db, &repo.id, "README.md", "login instructions").await;
        mark_ready(&db, &repo.id, 1, 1).await.unwrap();

        let assistant = assistant(&db, Arc::new(ScriptedChat::unreachable()));
        let mut sink = CollectingSink::default();

        let outcome = assistant.ask(&repo.id, "login", &mut sink).await.unwrap();
        assert!(outcome.report.error.is_some());
        assert_eq!(sink.tokens.len(), 1);
        assert!(sink.tokens[0].starts_with("[ERROR: "));
        assert!(sink.finished);
    }
}
