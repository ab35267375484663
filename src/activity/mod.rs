// Activity Module - Access Capture and Co-occurrence
//
// Records file accesses and grows the co-occurrence graph: two files
// accessed within the lookback window of each other gain one count on
// their (unordered) pair. The window is a lookback from each new access,
// not a tumbling bucket, so a burst of N distinct files produces
// N·(N−1)/2 increments spread across the burst.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{ActivityRecord, FileStore};
use crate::error::{Error, Result};

/// Number of per-id critical sections. Accesses to the same file id are
/// serialized; accesses to different ids may interleave, which is fine
/// because the window is approximate by design.
const LOCK_SHARDS: usize = 256;

/// Result of one logged access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub access_count_after: i64,
    pub copairs_updated: usize,
}

/// One row of the recent-activity listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentAccess {
    pub path: String,
    pub last_accessed: i64,
    pub access_count: i64,
}

/// Records accesses and maintains the co-occurrence graph. All state
/// lives in the store; this service owns only the lock table.
pub struct ActivityTracker {
    store: Arc<FileStore>,
    window_ms: i64,
    locks: Vec<tokio::sync::Mutex<()>>,
}

impl ActivityTracker {
    pub fn new(store: Arc<FileStore>, window_secs: u64) -> Self {
        Self {
            store,
            window_ms: window_secs as i64 * 1000,
            locks: (0..LOCK_SHARDS)
                .map(|_| tokio::sync::Mutex::new(()))
                .collect(),
        }
    }

    fn shard(&self, id: i64) -> &tokio::sync::Mutex<()> {
        &self.locks[(id as usize) % LOCK_SHARDS]
    }

    /// Log an access to a registered path at time `now` (unix millis).
    ///
    /// The window read happens before the file's own `last_accessed`
    /// moves, so accesses at the same instant never self-pair. The whole
    /// read-update-bump sequence is serialized per file id.
    pub async fn log(&self, path: &str, now: i64) -> Result<ActivitySummary> {
        let file = self
            .store
            .get_file_by_path(path)?
            .ok_or_else(|| Error::NotFound(format!("path is not indexed: {path}")))?;

        let _guard = self.shard(file.id).lock().await;

        let window_start = now - self.window_ms;
        let others = self.store.recent_access_ids(window_start, file.id)?;
        let update = self.store.record_access(file.id, now)?;

        for other in &others {
            self.store.bump_copair(file.id, *other)?;
        }

        debug!(
            "Logged access to {} (count {}, {} co-pairs bumped)",
            path,
            update.access_count,
            others.len()
        );

        Ok(ActivitySummary {
            access_count_after: update.access_count,
            copairs_updated: others.len(),
        })
    }

    /// Most recently accessed files with their paths resolved.
    pub fn recent(&self, limit: usize) -> Result<Vec<RecentAccess>> {
        let records: Vec<ActivityRecord> = self.store.recent_activity(limit)?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if let Some(file) = self.store.get_file_by_id(record.file_id)? {
                out.push(RecentAccess {
                    path: file.path,
                    last_accessed: record.last_accessed,
                    access_count: record.access_count,
                });
            }
        }
        Ok(out)
    }
}
