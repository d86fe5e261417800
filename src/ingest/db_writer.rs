use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::{HashMap, HashSet};

use crate::db::Db;
use crate::embeddings::storage::encode_embedding;
use crate::error::Result;

/// File Record content about to be written
#[derive(Debug, Clone)]
pub struct FileWrite {
    pub path: String,
    pub extension: String,
    pub content: String,
    pub digest: String,
    pub tokens: usize,
}

/// One embedded chunk about to be written
#[derive(Debug, Clone)]
pub struct ChunkWrite {
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub embedding: Vec<f32>,
    pub model: String,
    pub digest: String,
    pub tokens: usize,
}

/// Stored digest of every File Record in a repository, keyed by path
pub async fn get_file_digests(db: &Db, repository_id: &str) -> Result<HashMap<String, String>> {
    let repository_id = repository_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT path, digest FROM files WHERE repository_id = ?1")?;
        let rows = stmt.query_map(params![repository_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, digest) = row?;
            map.insert(path, digest);
        }
        Ok(map)
    })
    .await
}

/// Upsert a File Record and swap its whole chunk set in one transaction.
///
/// Readers see either the previous version of the file with its chunks, or the new
/// version with the new chunks; never a mix. Returns the file id.
pub async fn replace_file(
    db: &Db,
    repository_id: &str,
    file: FileWrite,
    chunks: Vec<ChunkWrite>,
) -> Result<i64> {
    let repository_id = repository_id.to_string();
    let now = Utc::now().to_rfc3339();

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO files (repository_id, path, extension, content, digest, tokens, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(repository_id, path) DO UPDATE SET
                extension = excluded.extension,
                content = excluded.content,
                digest = excluded.digest,
                tokens = excluded.tokens,
                updated_at = excluded.updated_at
            "#,
            params![
                repository_id,
                file.path,
                file.extension,
                file.content,
                file.digest,
                file.tokens as i64,
                now,
            ],
        )?;

        let file_id: i64 = tx.query_row(
            "SELECT id FROM files WHERE repository_id = ?1 AND path = ?2",
            params![repository_id, file.path],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id])?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (
                    file_id, repository_id, chunk_index, content, start_line,
                    embedding, dimensions, model, digest, tokens
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for chunk in &chunks {
                stmt.execute(params![
                    file_id,
                    repository_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.start_line as i64,
                    encode_embedding(&chunk.embedding),
                    chunk.embedding.len() as i64,
                    chunk.model,
                    chunk.digest,
                    chunk.tokens as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(file_id)
    })
    .await
}

/// Delete File Records whose path is not in `keep`; chunks go with them (CASCADE).
///
/// Returns the removed paths.
pub async fn delete_files_not_in(db: &Db, repository_id: &str, keep: HashSet<String>) -> Result<Vec<String>> {
    let repository_id = repository_id.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM files WHERE repository_id = ?1")?;
            let paths = stmt
                .query_map(params![repository_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            paths.into_iter().filter(|p| !keep.contains(p)).collect()
        };

        for path in &stale {
            tx.execute(
                "DELETE FROM files WHERE repository_id = ?1 AND path = ?2",
                params![repository_id, path],
            )?;
        }
        tx.commit()?;
        Ok(stale)
    })
    .await
}

/// Paths of all File Records, sorted
pub async fn list_file_paths(db: &Db, repository_id: &str) -> Result<Vec<String>> {
    let repository_id = repository_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT path FROM files WHERE repository_id = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![repository_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(paths)
    })
    .await
}

pub async fn count_chunks(db: &Db, repository_id: &str) -> Result<usize> {
    let repository_id = repository_id.to_string();
    db.with_connection(move |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    })
    .await
}

/// `updated_at` of one File Record, if it exists
pub async fn file_updated_at(db: &Db, repository_id: &str, path: &str) -> Result<Option<String>> {
    let repository_id = repository_id.to_string();
    let path = path.to_string();
    db.with_connection(move |conn| {
        let updated_at = conn
            .query_row(
                "SELECT updated_at FROM files WHERE repository_id = ?1 AND path = ?2",
                params![repository_id, path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(updated_at)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repos::create_repository;
    use crate::db::test_support::setup_test_db;
    use crate::ingest::digest::digest;

    fn file(path: &str, content: &str) -> FileWrite {
        FileWrite {
            path: path.to_string(),
            extension: "rs".to_string(),
            content: content.to_string(),
            digest: digest(content.as_bytes()),
            tokens: 3,
        }
    }

    fn chunk(index: usize, content: &str) -> ChunkWrite {
        ChunkWrite {
            chunk_index: index,
            content: content.to_string(),
            start_line: index + 1,
            embedding: vec![0.1, 0.2, 0.3],
            model: "nomic-embed-text".to_string(),
            digest: digest(content.as_bytes()),
            tokens: 2,
        }
    }

    #[tokio::test]
    async fn test_replace_file_swaps_chunks() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();

        let first_id = replace_file(&db, &repo.id, file("a.rs", "v1"), vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")])
            .await
            .unwrap();
        assert_eq!(count_chunks(&db, &repo.id).await.unwrap(), 3);

        let second_id = replace_file(&db, &repo.id, file("a.rs", "v2"), vec![chunk(0, "z")])
            .await
            .unwrap();
        assert_eq!(first_id, second_id);
        assert_eq!(count_chunks(&db, &repo.id).await.unwrap(), 1);

        let digests = get_file_digests(&db, &repo.id).await.unwrap();
        assert_eq!(digests.get("a.rs"), Some(&digest(b"v2")));
    }

    #[tokio::test]
    async fn test_replace_file_without_chunks_keeps_record() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();

        replace_file(&db, &repo.id, file("empty.rs", ""), vec![]).await.unwrap();
        assert_eq!(list_file_paths(&db, &repo.id).await.unwrap(), vec!["empty.rs"]);
        assert_eq!(count_chunks(&db, &repo.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_files_not_in_cascades() {
        let (db, _temp_dir) = setup_test_db().await;
        let repo = create_repository(&db, "u", "octo", "hello").await.unwrap();
        replace_file(&db, &repo.id, file("keep.rs", "k"), vec![chunk(0, "k")]).await.unwrap();
        replace_file(&db, &repo.id, file("gone.rs", "g"), vec![chunk(0, "g"), chunk(1, "h")])
            .await
            .unwrap();

        let keep: HashSet<String> = ["keep.rs".to_string()].into_iter().collect();
        let removed = delete_files_not_in(&db, &repo.id, keep).await.unwrap();

        assert_eq!(removed, vec!["gone.rs"]);
        assert_eq!(list_file_paths(&db, &repo.id).await.unwrap(), vec!["keep.rs"]);
        assert_eq!(count_chunks(&db, &repo.id).await.unwrap(), 1);
        assert!(file_updated_at(&db, &repo.id, "gone.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_files_are_scoped_per_repository() {
        let (db, _temp_dir) = setup_test_db().await;
        let a = create_repository(&db, "u", "octo", "a").await.unwrap();
        let b = create_repository(&db, "u", "octo", "b").await.unwrap();

        replace_file(&db, &a.id, file("same.rs", "x"), vec![chunk(0, "x")]).await.unwrap();
        replace_file(&db, &b.id, file("same.rs", "y"), vec![chunk(0, "y")]).await.unwrap();

        assert_eq!(count_chunks(&db, &a.id).await.unwrap(), 1);
        assert_eq!(count_chunks(&db, &b.id).await.unwrap(), 1);
        assert_ne!(
            get_file_digests(&db, &a.id).await.unwrap()["same.rs"],
            get_file_digests(&db, &b.id).await.unwrap()["same.rs"]
        );
    }
}
