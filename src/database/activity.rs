//! Access activity and the co-occurrence graph.
//!
//! Activity rows are created lazily on first access and persist past
//! tombstoning; the counters are the historical signal the ranker feeds
//! on. Co-occurrence pairs are canonicalized so `id_1 < id_2` always
//! holds and each unordered pair has at most one row.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::FileStore;
use crate::error::Result;

/// Per-file access bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub file_id: i64,
    pub first_seen: i64,
    pub last_accessed: i64,
    pub access_count: i64,
}

/// What `record_access` observed and wrote, in one round trip.
#[derive(Debug, Clone)]
pub struct AccessUpdate {
    /// `last_accessed` before this call; `None` for a first access.
    pub previous: Option<i64>,
    /// Access count after this call.
    pub access_count: i64,
}

impl FileStore {
    /// Create-or-update the activity row for a file.
    ///
    /// `last_accessed` is monotone non-decreasing even if callers hand in
    /// an older timestamp. Returns the prior timestamp so the caller can
    /// reason about windows without a second read.
    pub fn record_access(&self, id: i64, ts: i64) -> Result<AccessUpdate> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous: Option<(i64, i64)> = tx
            .query_row(
                "SELECT last_accessed, access_count FROM file_activity WHERE file_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let update = match previous {
            Some((last_accessed, access_count)) => {
                tx.execute(
                    "UPDATE file_activity
                     SET last_accessed = MAX(last_accessed, ?2),
                         access_count = access_count + 1
                     WHERE file_id = ?1",
                    params![id, ts],
                )?;
                AccessUpdate {
                    previous: Some(last_accessed),
                    access_count: access_count + 1,
                }
            }
            None => {
                tx.execute(
                    "INSERT INTO file_activity (file_id, first_seen, last_accessed, access_count)
                     VALUES (?1, ?2, ?2, 1)",
                    params![id, ts],
                )?;
                AccessUpdate {
                    previous: None,
                    access_count: 1,
                }
            }
        };

        tx.commit()?;
        Ok(update)
    }

    pub fn get_activity(&self, id: i64) -> Result<Option<ActivityRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT file_id, first_seen, last_accessed, access_count
             FROM file_activity WHERE file_id = ?1",
            params![id],
            |row| {
                Ok(ActivityRecord {
                    file_id: row.get(0)?,
                    first_seen: row.get(1)?,
                    last_accessed: row.get(2)?,
                    access_count: row.get(3)?,
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids accessed at or after `since`, excluding the given id. This is
    /// the window read that feeds co-occurrence pairing.
    pub fn recent_access_ids(&self, since: i64, exclude: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id FROM file_activity
             WHERE last_accessed >= ?1 AND file_id != ?2
             ORDER BY file_id",
        )?;
        let rows = stmt.query_map(params![since, exclude], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Increment the co-occurrence count for an unordered pair, inserting
    /// at 1 on first occurrence. Self-pairs are rejected upstream.
    pub fn bump_copair(&self, a: i64, b: i64) -> Result<()> {
        debug_assert_ne!(a, b, "co-occurrence pairs must be distinct");
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file_cooccurrence (file_id_1, file_id_2, co_count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(file_id_1, file_id_2) DO UPDATE SET co_count = co_count + 1",
            params![lo, hi],
        )?;
        Ok(())
    }

    /// The co-occurrence count for an unordered pair; 0 if absent.
    pub fn co_count(&self, a: i64, b: i64) -> Result<u32> {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT co_count FROM file_cooccurrence
             WHERE file_id_1 = ?1 AND file_id_2 = ?2",
            params![lo, hi],
            |row| row.get(0),
        );
        match result {
            Ok(count) => Ok(count),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Every id paired with the given one, with its count.
    pub fn copartners(&self, id: i64) -> Result<Vec<(i64, u32)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id_2, co_count FROM file_cooccurrence WHERE file_id_1 = ?1
             UNION ALL
             SELECT file_id_1, co_count FROM file_cooccurrence WHERE file_id_2 = ?1",
        )?;
        let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut partners = Vec::new();
        for row in rows {
            partners.push(row?);
        }
        Ok(partners)
    }

    /// Most recently accessed files, newest first.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, first_seen, last_accessed, access_count
             FROM file_activity
             ORDER BY last_accessed DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ActivityRecord {
                file_id: row.get(0)?,
                first_seen: row.get(1)?,
                last_accessed: row.get(2)?,
                access_count: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
