//! Repository records: one row per imported codebase, owned by the importer
//! while its status is non-terminal.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Result, RepoRagError};

/// Import lifecycle: `pending → importing → ready | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Importing,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Importing => "importing",
            RepoStatus::Ready => "ready",
            RepoStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RepoStatus::Ready | RepoStatus::Error)
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = RepoRagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RepoStatus::Pending),
            "importing" => Ok(RepoStatus::Importing),
            "ready" => Ok(RepoStatus::Ready),
            "error" => Ok(RepoStatus::Error),
            other => Err(RepoRagError::InvalidInput(format!("unknown repository status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: String,
    pub user_id: String,
    /// Canonical `owner/name`
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub remote_id: Option<i64>,
    pub default_branch: Option<String>,
    pub status: RepoStatus,
    pub file_count: usize,
    pub indexed_files: usize,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const REPO_COLUMNS: &str = "id, user_id, full_name, owner, name, remote_id, default_branch, \
     status, file_count, indexed_files, error_message, created_at, updated_at";

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let status: String = row.get(7)?;
    let status = status.parse::<RepoStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Repository {
        id: row.get(0)?,
        user_id: row.get(1)?,
        full_name: row.get(2)?,
        owner: row.get(3)?,
        name: row.get(4)?,
        remote_id: row.get(5)?,
        default_branch: row.get(6)?,
        status,
        file_count: row.get::<_, i64>(8)? as usize,
        indexed_files: row.get::<_, i64>(9)? as usize,
        error_message: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Create a `pending` repository record; its id doubles as the import id.
pub async fn create_repository(db: &Db, user_id: &str, owner: &str, name: &str) -> Result<Repository> {
    let now = Utc::now().to_rfc3339();
    let repo = Repository {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        full_name: format!("{}/{}", owner, name),
        owner: owner.to_string(),
        name: name.to_string(),
        remote_id: None,
        default_branch: None,
        status: RepoStatus::Pending,
        file_count: 0,
        indexed_files: 0,
        error_message: None,
        created_at: now.clone(),
        updated_at: now,
    };

    let row = repo.clone();
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO repositories (id, user_id, full_name, owner, name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id,
                row.user_id,
                row.full_name,
                row.owner,
                row.name,
                row.status.as_str(),
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
    .await?;

    Ok(repo)
}

pub async fn get_repository(db: &Db, id: &str) -> Result<Option<Repository>> {
    let id = id.to_string();
    db.with_connection(move |conn| {
        let sql = format!("SELECT {} FROM repositories WHERE id = ?1", REPO_COLUMNS);
        let repo = conn
            .query_row(&sql, params![id], row_to_repository)
            .optional()?;
        Ok(repo)
    })
    .await
}

/// All repositories of a user, newest first
pub async fn list_repositories(db: &Db, user_id: &str) -> Result<Vec<Repository>> {
    let user_id = user_id.to_string();
    db.with_connection(move |conn| {
        let sql = format!(
            "SELECT {} FROM repositories WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            REPO_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let repos = stmt
            .query_map(params![user_id], row_to_repository)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(repos)
    })
    .await
}

/// The ready import of a remote repository for this user, if one exists
pub async fn find_ready_by_remote_id(db: &Db, user_id: &str, remote_id: i64) -> Result<Option<Repository>> {
    let user_id = user_id.to_string();
    db.with_connection(move |conn| {
        let sql = format!(
            "SELECT {} FROM repositories WHERE user_id = ?1 AND remote_id = ?2 AND status = 'ready'",
            REPO_COLUMNS
        );
        let repo = conn
            .query_row(&sql, params![user_id, remote_id], row_to_repository)
            .optional()?;
        Ok(repo)
    })
    .await
}

/// The ready import for `owner/name` (case-insensitive), resolved without the remote API
pub async fn find_ready_by_full_name(db: &Db, user_id: &str, full_name: &str) -> Result<Option<Repository>> {
    let user_id = user_id.to_string();
    let full_name = full_name.to_string();
    db.with_connection(move |conn| {
        let sql = format!(
            "SELECT {} FROM repositories
             WHERE user_id = ?1 AND full_name = ?2 COLLATE NOCASE AND status = 'ready'
             ORDER BY updated_at DESC LIMIT 1",
            REPO_COLUMNS
        );
        let repo = conn
            .query_row(&sql, params![user_id, full_name], row_to_repository)
            .optional()?;
        Ok(repo)
    })
    .await
}

/// Record remote metadata and enter `importing`
pub async fn mark_importing(
    db: &Db,
    id: &str,
    full_name: &str,
    remote_id: i64,
    default_branch: &str,
    file_count: usize,
) -> Result<()> {
    let id = id.to_string();
    let full_name = full_name.to_string();
    let default_branch = default_branch.to_string();
    let now = Utc::now().to_rfc3339();
    db.with_connection(move |conn| {
        let updated = conn.execute(
            "UPDATE repositories
             SET full_name = ?2, remote_id = ?3, default_branch = ?4, status = 'importing',
                 file_count = ?5, indexed_files = 0, error_message = NULL, updated_at = ?6
             WHERE id = ?1",
            params![id, full_name, remote_id, default_branch, file_count as i64, now],
        )?;
        if updated == 0 {
            return Err(RepoRagError::NotFound(format!("repository {}", id)));
        }
        Ok(())
    })
    .await
}

/// Move to a new status; `error_message` is kept only for `error`.
pub async fn set_status(db: &Db, id: &str, status: RepoStatus, error_message: Option<&str>) -> Result<()> {
    let id = id.to_string();
    let error_message = error_message.map(|m| m.to_string());
    let now = Utc::now().to_rfc3339();
    db.with_connection(move |conn| {
        let updated = conn.execute(
            "UPDATE repositories SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), error_message, now],
        )?;
        if updated == 0 {
            return Err(RepoRagError::NotFound(format!("repository {}", id)));
        }
        Ok(())
    })
    .await
}

pub async fn set_indexed_files(db: &Db, id: &str, indexed_files: usize) -> Result<()> {
    let id = id.to_string();
    let now = Utc::now().to_rfc3339();
    db.with_connection(move |conn| {
        conn.execute(
            "UPDATE repositories SET indexed_files = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, indexed_files as i64, now],
        )?;
        Ok(())
    })
    .await
}

/// Final transition: counts and `ready` in one statement
pub async fn mark_ready(db: &Db, id: &str, file_count: usize, indexed_files: usize) -> Result<()> {
    let id = id.to_string();
    let now = Utc::now().to_rfc3339();
    db.with_connection(move |conn| {
        conn.execute(
            "UPDATE repositories
             SET status = 'ready', file_count = ?2, indexed_files = ?3, error_message = NULL, updated_at = ?4
             WHERE id = ?1",
            params![id, file_count as i64, indexed_files as i64, now],
        )?;
        Ok(())
    })
    .await
}

/// Remove a record together with its files and chunks
pub async fn delete_repository(db: &Db, id: &str) -> Result<()> {
    let id = id.to_string();
    db.with_connection(move |conn| {
        conn.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        Ok(())
    })
    .await
}

/// Move every `pending` or `importing` record to `error`.
///
/// Imports do not survive a restart; run once at startup.
pub async fn fail_interrupted(db: &Db) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    db.with_connection(move |conn| {
        let updated = conn.execute(
            "UPDATE repositories SET status = 'error', error_message = 'interrupted', updated_at = ?1
             WHERE status IN ('pending', 'importing')",
            params![now],
        )?;
        Ok(updated)
    })
    .await
}
