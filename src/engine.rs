//! The engine facade.
//!
//! Wires the store, scanner, index, activity tracker, and ranker together
//! from one [`EngineConfig`] plus the injected extractor and embedder, and
//! exposes the operations the adapters forward: `health`, `scan`,
//! `recommend`, `log_activity`, `list_files`, `recent_activity`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::activity::{ActivitySummary, ActivityTracker, RecentAccess};
use crate::config::EngineConfig;
use crate::database::{now_ms, FileStore};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::extract::TextExtractor;
use crate::index::VectorIndex;
use crate::ranker::{Ranker, Recommendation};
use crate::scanner::{ScanFilter, ScanReport, Scanner};

/// Snapshot returned by `health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    pub config_loaded: bool,
    pub n_files: i64,
    pub n_embedded: i64,
    pub index_dirty: bool,
}

/// Registry identity is the canonical absolute path. A path that no longer
/// resolves (deleted file) is looked up as given.
fn normalize_path(path: &str) -> String {
    std::path::Path::new(path)
        .canonicalize()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string())
}

pub struct Engine {
    store: Arc<FileStore>,
    index: Arc<VectorIndex>,
    activity: Arc<ActivityTracker>,
    scanner: Scanner,
    ranker: Ranker,
    /// Parent token; every operation runs under a child of it so the
    /// adapter can cancel everything at once on shutdown.
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(FileStore::open(
            &config.database_path(),
            config.store.pool_size,
        )?);

        let index = Arc::new(VectorIndex::new(config.embeddings.dim, config.index_dir()));
        if index.load_from_disk() {
            info!("Serving persisted ANN index");
        }

        let activity = Arc::new(ActivityTracker::new(
            Arc::clone(&store),
            config.activity.window_secs,
        ));

        let filter = ScanFilter::new(
            &config.scan.allowed_extensions,
            &config.scan.ignore,
            config.scan.max_file_size,
        )?;
        let scanner = Scanner::new(
            Arc::clone(&store),
            extractor,
            embedder,
            filter,
            config.scan.snippet_bytes,
            config.scan.embed_batch_size,
        );

        let ranker = Ranker::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&activity),
            config.ranking.clone(),
        );

        Ok(Self {
            store,
            index,
            activity,
            scanner,
            ranker,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token the adapter can use to cancel in-flight work on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn health(&self) -> Result<Health> {
        let stats = self.store.stats()?;
        let index_dirty = self.store.scan_epoch()? != self.index.indexed_epoch();
        Ok(Health {
            ok: true,
            config_loaded: true,
            n_files: stats.n_files,
            n_embedded: stats.n_embedded,
            index_dirty,
        })
    }

    /// Reconcile one root with the store.
    pub async fn scan(&self, root: &Path) -> Result<ScanReport> {
        self.scanner.scan(root, self.shutdown.child_token()).await
    }

    /// Ranked recommendations for a query path.
    pub async fn recommend(&self, path: &str, limit: usize) -> Result<Vec<Recommendation>> {
        let path = normalize_path(path);
        self.ranker
            .recommend(&path, limit, now_ms(), &self.shutdown.child_token())
            .await
    }

    /// Record an access event for a path.
    pub async fn log_activity(&self, path: &str) -> Result<ActivitySummary> {
        let path = normalize_path(path);
        self.activity.log(&path, now_ms()).await
    }

    /// All live registered paths.
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_live_files()?
            .into_iter()
            .map(|f| f.path)
            .collect())
    }

    /// Most recently accessed files.
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<RecentAccess>> {
        self.activity.recent(limit)
    }

    /// Shared store handle, for callers composing their own queries.
    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }
}
