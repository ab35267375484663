//! File registry operations.
//!
//! The registry assigns each path an opaque integer id on first
//! registration. Ids are never reused: the table uses AUTOINCREMENT and
//! rows are tombstoned instead of deleted, so historical activity keeps
//! pointing at the file it was recorded for.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{now_ms, FileStore};
use crate::error::Result;

/// One row of the file registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub size: i64,
    /// Filesystem mtime, unix milliseconds.
    pub last_modified: i64,
    pub mime: Option<String>,
    /// SHA-256 of the file bytes, hex.
    pub hash: String,
    pub last_scanned: i64,
    pub tombstoned: bool,
}

fn row_to_file(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get("id")?,
        path: row.get("path")?,
        size: row.get("size")?,
        last_modified: row.get("last_modified")?,
        mime: row.get("mime")?,
        hash: row.get("hash")?,
        last_scanned: row.get("last_scanned")?,
        tombstoned: row.get::<_, i64>("tombstoned")? != 0,
    })
}

const FILE_COLUMNS: &str = "id, path, size, last_modified, mime, hash, last_scanned, tombstoned";

impl FileStore {
    /// Insert or update a registry row.
    ///
    /// Returns the file id and whether this call changed the stored hash
    /// or size. The upsert targets the path constraint so the rowid (and
    /// therefore the id) is stable across updates; a tombstoned row that
    /// reappears on disk is revived in place.
    pub fn upsert_file(
        &self,
        path: &str,
        size: i64,
        mtime: i64,
        mime: Option<&str>,
        hash: &str,
    ) -> Result<(i64, bool)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_ms();

        let previous: Option<(i64, String, i64)> = tx
            .query_row(
                "SELECT id, hash, size FROM files WHERE path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let (id, changed) = match previous {
            Some((id, old_hash, old_size)) => {
                let changed = old_hash != hash || old_size != size;
                tx.execute(
                    "UPDATE files
                     SET size = ?2, last_modified = ?3, mime = ?4, hash = ?5,
                         last_scanned = ?6, tombstoned = 0
                     WHERE id = ?1",
                    params![id, size, mtime, mime, hash, now],
                )?;
                (id, changed)
            }
            None => {
                tx.execute(
                    "INSERT INTO files
                     (path, size, last_modified, mime, hash, last_scanned, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![path, size, mtime, mime, hash, now],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        tx.commit()?;
        Ok((id, changed))
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1"),
            params![path],
            row_to_file,
        );
        match result {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
            params![id],
            row_to_file,
        );
        match result {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All non-tombstoned files, ordered by path for deterministic output.
    pub fn list_live_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE tombstoned = 0 ORDER BY path"
        ))?;
        let rows = stmt.query_map([], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Live files whose path sits under the given root directory.
    pub fn list_live_under(&self, root: &str) -> Result<Vec<FileRecord>> {
        // LIKE wildcards occurring in the root itself must not match.
        let escaped = root
            .trim_end_matches('/')
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let prefix = format!("{escaped}/%");
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE tombstoned = 0 AND path LIKE ?1 ESCAPE '\\'
             ORDER BY path"
        ))?;
        let rows = stmt.query_map(params![prefix], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Mark a file as logically deleted.
    ///
    /// Idempotent. Drops the content row (and with it the embedding, so the
    /// next index rebuild loses the vector) but keeps the registry row and
    /// every activity / co-occurrence counter.
    pub fn tombstone(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET tombstoned = 1 WHERE id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM file_content WHERE file_id = ?1", params![id])?;
        tx.commit()?;
        debug!("Tombstoned file id {}", id);
        Ok(())
    }
}
