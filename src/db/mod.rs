use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, RepoRagError};

pub mod migrate;
pub mod repos;

pub use repos::{RepoStatus, Repository};

// WAL lets the retriever read while an import is writing the same repository.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA busy_timeout = 5000; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536;";

/// Database connection wrapper
///
/// Cheap to clone; every call opens its own connection on the blocking pool.
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Create the manager and bring the schema up to date
    pub async fn open_migrated<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db = Self::new(db_path);
        db.with_connection(migrate::run_migrations).await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let mut conn = db.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            RepoRagError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("database task failed: {}", e),
            ))
        })?
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Db;
    use tempfile::TempDir;

    /// Fresh migrated database in a temp dir; keep the TempDir alive for the test.
    pub async fn setup_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::open_migrated(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (db, temp_dir)
    }
}
