use rusqlite::params;

use crate::db::Db;
use crate::error::{Result, RepoRagError};

/// Convert a vector to its BLOB form (raw f32, little-endian)
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RepoRagError::Embedding(format!(
            "Invalid embedding BLOB length: {}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// A chunk as seen by the retriever
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: i64,
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Load every chunk of a repository in insertion order.
///
/// Rows with a corrupt vector are skipped with a warning rather than failing the scan.
pub async fn load_repo_chunks(db: &Db, repository_id: &str) -> Result<Vec<StoredChunk>> {
    let repository_id = repository_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT c.id, f.path, c.chunk_index, c.content, c.start_line, c.embedding, c.model
             FROM chunks c
             JOIN files f ON f.id = c.file_id
             WHERE c.repository_id = ?1
             ORDER BY c.id",
        )?;

        let rows = stmt.query_map(params![repository_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Vec<u8>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, file_path, chunk_index, content, start_line, blob, model) = row?;
            match decode_embedding(&blob) {
                Ok(embedding) => chunks.push(StoredChunk {
                    id,
                    file_path,
                    chunk_index: chunk_index as usize,
                    content,
                    start_line: start_line as usize,
                    embedding,
                    model,
                }),
                Err(e) => log::warn!("Skipping chunk {} of {}: {}", id, file_path, e),
            }
        }
        Ok(chunks)
    })
    .await
}
