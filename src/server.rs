//! HTTP transport: import, progress (SSE), repository views, retrieval and ask (SSE).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt as TokioStreamExt;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::EmbeddingCache;
use crate::config::{Config, HttpServerConfig};
use crate::db::repos::{self, get_repository, list_repositories, RepoStatus, Repository};
use crate::db::Db;
use crate::embeddings::{EmbeddingGenerator, OllamaEmbedder};
use crate::error::{RepoRagError, Result};
use crate::ingest::{repository_tree, Chunker, ImportRequest, Importer};
use crate::progress::{ListenerId, ProgressEvent, ProgressHub};
use crate::rag::{Assistant, ChannelSink, OllamaChat, PromptOptions, TokenSink};
use crate::remote::github::GithubClient;
use crate::search::Retriever;

/// Everything a request handler or CLI needs, wired once per process
#[derive(Clone)]
pub struct AppContext {
    pub db: Db,
    pub importer: Importer,
    pub retriever: Arc<Retriever>,
    pub assistant: Assistant,
}

impl AppContext {
    pub fn new(db: Db, importer: Importer, retriever: Arc<Retriever>, assistant: Assistant) -> Self {
        Self {
            db,
            importer,
            retriever,
            assistant,
        }
    }

    /// Open the store and build the production clients from configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Db::open_migrated(config.db_path()).await?;

        let source = Arc::new(GithubClient::new(&config.github, config.github_token()));
        let embedder = Arc::new(OllamaEmbedder::new(&config.embeddings.base_url, config.embedding_timeout()));
        let mut generator = EmbeddingGenerator::new(embedder, &config.embeddings);
        if config.embeddings.cache_capacity > 0 {
            generator = generator.with_cache(Arc::new(EmbeddingCache::new(config.embeddings.cache_capacity)));
        }
        let generator = Arc::new(generator);

        let importer = Importer::new(
            db.clone(),
            source,
            generator.clone(),
            Chunker::new(&config.chunking),
            Arc::new(ProgressHub::new()),
        );
        let retriever = Arc::new(Retriever::new(db.clone(), generator, &config.search));
        let chat = Arc::new(OllamaChat::new(&config.llm.base_url, &config.llm.model));
        let assistant = Assistant::new(
            db.clone(),
            retriever.clone(),
            chat,
            PromptOptions {
                line_numbers: config.llm.line_numbers,
            },
        );

        Ok(Self::new(db, importer, retriever, assistant))
    }

    /// Mark imports cut short by the previous process as failed.
    ///
    /// Only the server calls this; the CLIs may run next to a live server.
    pub async fn fail_interrupted_imports(&self) -> Result<usize> {
        let failed = repos::fail_interrupted(&self.db).await?;
        if failed > 0 {
            log::warn!("{} unfinished imports from a previous run marked as error", failed);
        }
        Ok(failed)
    }
}

/// Error body plus status; every handler failure goes through here
struct ApiError(RepoRagError);

impl From<RepoRagError> for ApiError {
    fn from(err: RepoRagError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            RepoRagError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            RepoRagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RepoRagError::AlreadyImported { .. } => (StatusCode::CONFLICT, "already_imported"),
            RepoRagError::ImportInFlight(_) => (StatusCode::CONFLICT, "import_in_progress"),
            RepoRagError::Remote(_) | RepoRagError::Embedding(_) | RepoRagError::Inference(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
struct AppState {
    ctx: AppContext,
    api_key: Option<Arc<str>>,
}

/// HTTP server bound to one [`AppContext`]
pub struct HttpServer {
    ctx: AppContext,
    api_key: Option<String>,
    allowed_origins: Vec<String>,
    host: String,
    port: u16,
}

impl HttpServer {
    /// Reads the API key from the configured variable unless running authless
    pub fn new(ctx: AppContext, config: &HttpServerConfig) -> Result<Self> {
        let api_key = if config.authless {
            None
        } else {
            let key = std::env::var(&config.api_key_env).map_err(|_| {
                RepoRagError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file or enable authless mode.",
                    config.api_key_env
                ))
            })?;
            Some(key)
        };

        Ok(Self {
            ctx,
            api_key,
            allowed_origins: config.allowed_origins.clone(),
            host: config.host.clone(),
            port: config.port,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            RepoRagError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", addr, e),
            ))
        })?;
        log::info!("Listening on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| RepoRagError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("HTTP server error: {}", e))))
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            api_key: self.api_key.as_deref().map(Arc::from),
        };

        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        let api = Router::new()
            .route("/api/repos/import", post(handle_import))
            .route("/api/repos", get(handle_list_repos))
            .route("/api/repos/:id", get(handle_get_repo))
            .route("/api/repos/:id/tree", get(handle_tree))
            .route("/api/repos/:id/progress", get(handle_progress))
            .route("/api/search", post(handle_search))
            .route("/api/chat/stream", get(handle_chat_stream))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

        Router::new()
            .route("/health", get(handle_health))
            .merge(api)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(state)
    }
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        if let Err(response) = validate_auth(request.headers(), expected) {
            return response;
        }
    }
    next.run(request).await
}

fn validate_auth(headers: &HeaderMap, expected_key: &str) -> std::result::Result<(), Response> {
    let unauthorized = |message: &str| {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": message,
                "code": "unauthorized",
            })),
        )
            .into_response()
    };

    let header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header; use 'Authorization: Bearer <api-key>'"))?;
    let provided = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Invalid Authorization header format"))?;
    if provided != expected_key {
        return Err(unauthorized("Invalid API key"));
    }
    Ok(())
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "reporag",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct ImportBody {
    user_id: String,
    repo_url: String,
    #[serde(default)]
    refresh: bool,
}

async fn handle_import(State(state): State<AppState>, Json(body): Json<ImportBody>) -> ApiResult<Response> {
    let import_id = state
        .ctx
        .importer
        .start(ImportRequest {
            user_id: body.user_id,
            repo_url: body.repo_url,
            refresh: body.refresh,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "import_id": import_id,
            "repository_id": import_id,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
struct ListParams {
    user_id: String,
}

async fn handle_list_repos(State(state): State<AppState>, Query(params): Query<ListParams>) -> ApiResult<Json<Vec<Repository>>> {
    Ok(Json(list_repositories(&state.ctx.db, &params.user_id).await?))
}

async fn load_repository(db: &Db, id: &str) -> Result<Repository> {
    get_repository(db, id)
        .await?
        .ok_or_else(|| RepoRagError::NotFound(format!("repository {}", id)))
}

async fn handle_get_repo(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Repository>> {
    Ok(Json(load_repository(&state.ctx.db, &id).await?))
}

async fn handle_tree(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let repo = load_repository(&state.ctx.db, &id).await?;
    let tree = repository_tree(&state.ctx.db, &repo.id).await?;
    Ok(Json(serde_json::json!({
        "repository_id": repo.id,
        "tree": tree,
    }))
    .into_response())
}

/// Drops the progress listener when the SSE response goes away
struct ListenerGuard {
    hub: Arc<ProgressHub>,
    import_id: String,
    listener: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.import_id, self.listener);
    }
}

fn progress_event(event: &ProgressEvent) -> Event {
    let name = match event {
        ProgressEvent::FileStart { .. } => "FILE_START",
        ProgressEvent::ChunkProgress { .. } => "CHUNK_PROGRESS",
        ProgressEvent::FileDone { .. } => "FILE_DONE",
        ProgressEvent::Done { .. } => "DONE",
        ProgressEvent::Error { .. } => "ERROR",
    };
    Event::default()
        .event(name)
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// Terminal event for an import that finished before this process started
fn settled_event(repo: &Repository) -> Option<ProgressEvent> {
    match repo.status {
        RepoStatus::Ready => Some(ProgressEvent::Done {
            total_files: repo.file_count,
            overall_percent: 100.0,
            message: "Import complete".to_string(),
        }),
        RepoStatus::Error => Some(ProgressEvent::Error {
            message: repo.error_message.clone().unwrap_or_else(|| "Import failed".to_string()),
        }),
        RepoStatus::Pending | RepoStatus::Importing => None,
    }
}

async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let repo = load_repository(&state.ctx.db, &id).await?;
    let hub = state.ctx.importer.progress().clone();

    let settled = if hub.last_event(&id).is_none() {
        settled_event(&repo)
    } else {
        None
    };

    let events: std::pin::Pin<Box<dyn Stream<Item = std::result::Result<Event, Infallible>> + Send>> =
        match settled {
            Some(event) => Box::pin(stream::once(async move { Ok(progress_event(&event)) })),
            None => {
                let (listener, rx) = hub.register(&id);
                let guard = ListenerGuard {
                    hub,
                    import_id: id,
                    listener,
                };
                Box::pin(UnboundedReceiverStream::new(rx).map(move |event| {
                    let _guard = &guard;
                    Ok(progress_event(&event))
                }))
            }
        };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
struct SearchBody {
    repository_id: String,
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> ApiResult<Response> {
    if body.query.trim().is_empty() {
        return Err(RepoRagError::InvalidInput("query must not be empty".to_string()).into());
    }
    let repo = load_repository(&state.ctx.db, &body.repository_id).await?;
    let results = state
        .ctx
        .retriever
        .retrieve(&repo.id, &body.query, body.k)
        .await?;

    Ok(Json(serde_json::json!({
        "repository_id": repo.id,
        "status": repo.status,
        "results": results,
    }))
    .into_response())
}

#[derive(Deserialize)]
struct ChatParams {
    repository_id: String,
    query: String,
}

fn chat_event(item: Option<String>) -> Event {
    match item {
        Some(token) if token.starts_with("[ERROR: ") => Event::default().event("error").data(token),
        Some(token) => Event::default()
            .event("token")
            .data(serde_json::json!({ "token": token }).to_string()),
        None => Event::default().event("done").data("{}"),
    }
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    if params.query.trim().is_empty() {
        return Err(RepoRagError::InvalidInput("query must not be empty".to_string()).into());
    }
    // reject before opening the stream so the client gets a proper status code
    state.ctx.assistant.require_ready(&params.repository_id).await?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let assistant = state.ctx.assistant.clone();
    let repository_id = params.repository_id.clone();
    let query = params.query.clone();
    tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        if let Err(e) = assistant.ask(&repository_id, &query, &mut sink).await {
            sink.token(&format!("[ERROR: {}]", e));
            sink.done();
        }
    });

    let start = Event::default().event("start").data(
        serde_json::json!({
            "repository_id": params.repository_id,
            "query": params.query,
        })
        .to_string(),
    );
    let events = stream::once(async move { Ok::<_, Infallible>(start) })
        .chain(UnboundedReceiverStream::new(rx).map(|item| Ok::<_, Infallible>(chat_event(item))));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
