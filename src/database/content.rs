//! Content rows: text snippet plus the embedding vector as a BLOB.
//!
//! Vectors are serialized as little-endian f32 byte strings. A null
//! embedding means the snippet was empty (non-textual file).

use rusqlite::params;
use tracing::warn;

use super::FileStore;
use crate::error::{Error, Result};

/// Serialize an f32 vector to little-endian bytes.
fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian bytes back to an f32 vector.
fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Decode(format!(
            "embedding blob has invalid size {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl FileStore {
    /// Replace the content row for a file atomically.
    pub fn put_content(&self, id: i64, snippet: &str, embedding: Option<&[f32]>) -> Result<()> {
        let bytes = embedding.map(vector_to_bytes);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file_content (file_id, snippet, embedding)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id) DO UPDATE SET snippet = ?2, embedding = ?3",
            params![id, snippet, bytes],
        )?;
        Ok(())
    }

    /// The stored embedding for a file, if any.
    pub fn get_embedding(&self, id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT embedding FROM file_content WHERE file_id = ?1",
            params![id],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        );
        match result {
            Ok(Some(bytes)) => Ok(Some(bytes_to_vector(&bytes)?)),
            Ok(None) => Ok(None),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The stored snippet for a file, if any.
    pub fn get_snippet(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT snippet FROM file_content WHERE file_id = ?1",
            params![id],
            |row| row.get(0),
        );
        match result {
            Ok(snippet) => Ok(Some(snippet)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every live `(id, embedding)` pair, for index rebuilds.
    ///
    /// Rows with corrupt blobs are skipped with a warning rather than
    /// failing the whole rebuild.
    pub fn load_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, c.embedding FROM files f
             JOIN file_content c ON c.file_id = f.id
             WHERE f.tombstoned = 0 AND c.embedding IS NOT NULL
             ORDER BY f.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            match bytes_to_vector(&bytes) {
                Ok(vector) => embeddings.push((id, vector)),
                Err(e) => warn!("Skipping corrupt embedding for file id {}: {}", id, e),
            }
        }
        Ok(embeddings)
    }
}
