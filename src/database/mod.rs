// Kindred's Database Module - SQLite Source of Truth
//!
//! Persistent storage for the file registry, content snippets with their
//! embedding vectors, access activity, and the co-occurrence graph. SQLite
//! in WAL mode is the single source of truth; every other component derives
//! its state from here.
//!
//! Key features:
//! - File tracking with SHA-256 hashing for incremental scans
//! - Stable integer file ids that survive tombstoning and are never reused
//! - Activity and co-occurrence counters that outlive file deletion
//! - A scan-epoch counter that tells the ANN index when it is stale

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};

mod activity;
mod content;
mod files;

pub use activity::{AccessUpdate, ActivityRecord};
pub use files::FileRecord;

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// Compute the SHA-256 hex digest of a file, streamed in chunks.
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Counts reported by `health`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub n_files: i64,
    pub n_embedded: i64,
}

/// The main database handle and typed operations.
///
/// Holds a bounded connection pool; SQLite WAL mode gives concurrent
/// readers with serialized writers, and `busy_timeout` absorbs short
/// write contention instead of surfacing it.
pub struct FileStore {
    pool: Pool<SqliteConnectionManager>,
}

impl FileStore {
    /// Open (or create) the database at the given path and initialize
    /// the schema.
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening SQLite database at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 30000;
                 PRAGMA foreign_keys = ON;",
            )
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| Error::Store(format!("connection pool: {}", e)))?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory database for tests. A shared cache lets every pooled
    /// connection see the same data.
    pub fn open_in_memory() -> Result<Self> {
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let name = format!(
            "kindred-mem-{}",
            NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );
        // Shared cache so all pooled connections see the same in-memory
        // database; the default open flags already understand file: URIs.
        let manager =
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
                .with_init(|conn| {
                    conn.execute_batch("PRAGMA busy_timeout = 30000; PRAGMA foreign_keys = ON;")
                });
        let pool = Pool::builder()
            .max_size(2)
            .build(manager)
            .map_err(|e| Error::Store(format!("connection pool: {}", e)))?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    fn initialize_schema(&self) -> Result<()> {
        debug!("Creating database schema");
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 path TEXT NOT NULL UNIQUE,
                 size INTEGER NOT NULL,
                 last_modified INTEGER NOT NULL,
                 mime TEXT,
                 hash TEXT NOT NULL,
                 last_scanned INTEGER NOT NULL,
                 tombstoned INTEGER NOT NULL DEFAULT 0,
                 created_at INTEGER NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_files_tombstoned ON files(tombstoned);
             CREATE INDEX IF NOT EXISTS idx_files_modified ON files(last_modified);

             CREATE TABLE IF NOT EXISTS file_content (
                 file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
                 snippet TEXT NOT NULL,
                 embedding BLOB
             );

             CREATE TABLE IF NOT EXISTS file_activity (
                 file_id INTEGER PRIMARY KEY REFERENCES files(id),
                 first_seen INTEGER NOT NULL,
                 last_accessed INTEGER NOT NULL,
                 access_count INTEGER NOT NULL DEFAULT 0
             );

             CREATE INDEX IF NOT EXISTS idx_activity_accessed
                 ON file_activity(last_accessed);

             CREATE TABLE IF NOT EXISTS file_cooccurrence (
                 file_id_1 INTEGER NOT NULL REFERENCES files(id),
                 file_id_2 INTEGER NOT NULL REFERENCES files(id),
                 co_count INTEGER NOT NULL DEFAULT 0,
                 PRIMARY KEY (file_id_1, file_id_2)
             );

             CREATE INDEX IF NOT EXISTS idx_cooccurrence_count
                 ON file_cooccurrence(co_count);

             CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// The scan epoch: bumped on any write that could invalidate the ANN
    /// index. The index caches the epoch it was built against and rebuilds
    /// when the two differ.
    pub fn scan_epoch(&self) -> Result<i64> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'scan_epoch'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Bump the scan epoch, marking the ANN index stale.
    pub fn bump_scan_epoch(&self) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('scan_epoch', '1')
             ON CONFLICT(key) DO UPDATE SET
                 value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
            [],
        )?;
        drop(conn);
        let epoch = self.scan_epoch()?;
        debug!("Scan epoch bumped to {}", epoch);
        Ok(epoch)
    }

    /// Counts for health reporting.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let n_files: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE tombstoned = 0",
            [],
            |row| row.get(0),
        )?;
        let n_embedded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files f
             JOIN file_content c ON c.file_id = f.id
             WHERE f.tombstoned = 0 AND c.embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(StoreStats { n_files, n_embedded })
    }
}
