pub mod config;
pub mod error;
pub mod db;
pub mod remote;
pub mod ingest;
pub mod embeddings;
pub mod cache;
pub mod progress;
pub mod search;
pub mod rag;
pub mod server;

pub use config::Config;
pub use error::{RepoRagError, Result};
pub use server::{AppContext, HttpServer};
