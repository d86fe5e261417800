use thiserror::Error;

/// Main error type for RepoRAG
#[derive(Error, Debug)]
pub enum RepoRagError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (bad repository URL, empty query, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote repository or local record does not exist (or is not accessible)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Hosting API transport failure or unexpected status
    #[error("Remote API error: {0}")]
    Remote(String),

    /// Embedding service errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Inference / completion service errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A ready import already exists for this repository
    #[error("Repository already imported: {full_name} ({repository_id})")]
    AlreadyImported {
        full_name: String,
        repository_id: String,
    },

    /// Another import of the same repository is still running
    #[error("Import already in progress: {0}")]
    ImportInFlight(String),
}

/// Convenient Result type using RepoRagError
pub type Result<T> = std::result::Result<T, RepoRagError>;
