// Scanner Module - Filesystem Reconciliation
//
// Walks directory roots and reconciles what is on disk with the store:
// new and changed files are hashed, extracted, and embedded; files that
// vanished are tombstoned. Change detection is two-stage: a cheap
// (size, mtime) comparison short-circuits unchanged files, and SHA-256
// settles the rest, so an unchanged tree is never re-read in full.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use tracing::{info, warn};

use crate::database::{calculate_file_hash, FileStore};
use crate::embeddings::{l2_normalize, Embedder};
use crate::error::{Error, Result};
use crate::extract::{Extraction, TextExtractor};

mod filtering;

pub use filtering::ScanFilter;

/// Outcome of one root scan.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    /// Per-file failures (unreadable, decode, extractor, embedder); these
    /// never abort a scan.
    pub failures: usize,
}

/// Scan outcome shared with coalesced callers.
type SharedOutcome = std::result::Result<ScanReport, String>;

/// Reconciles directory roots with the store.
///
/// Scans of disjoint roots run in parallel; two concurrent scans of the
/// same root coalesce, with the second caller receiving the first one's
/// report.
pub struct Scanner {
    store: Arc<FileStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    filter: Arc<ScanFilter>,
    snippet_bytes: usize,
    embed_batch_size: usize,
    in_flight: tokio::sync::Mutex<HashMap<PathBuf, watch::Receiver<Option<SharedOutcome>>>>,
}

enum Role {
    Leader(watch::Sender<Option<SharedOutcome>>),
    Joiner(watch::Receiver<Option<SharedOutcome>>),
}

impl Scanner {
    pub fn new(
        store: Arc<FileStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        filter: ScanFilter,
        snippet_bytes: usize,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            store,
            extractor,
            embedder,
            filter: Arc::new(filter),
            snippet_bytes,
            embed_batch_size,
            in_flight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Scan one root and reconcile the store with it.
    pub async fn scan(&self, root: &Path, cancel: CancellationToken) -> Result<ScanReport> {
        let root = root
            .canonicalize()
            .map_err(|e| Error::InvalidInput(format!("cannot open root {}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "scan root is not a directory: {}",
                root.display()
            )));
        }

        let role = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&root) {
                Some(rx) => Role::Joiner(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(root.clone(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Joiner(mut rx) => {
                info!("Joining in-flight scan of {}", root.display());
                loop {
                    {
                        let value = rx.borrow_and_update();
                        if let Some(outcome) = value.as_ref() {
                            return match outcome {
                                Ok(report) => Ok(report.clone()),
                                Err(message) => Err(Error::Internal(message.clone())),
                            };
                        }
                    }
                    if rx.changed().await.is_err() {
                        return Err(Error::Internal("scan was abandoned".into()));
                    }
                }
            }
            Role::Leader(tx) => {
                let outcome = self.run(&root, cancel).await;
                let shared = match &outcome {
                    Ok(report) => Ok(report.clone()),
                    Err(e) => Err(e.to_string()),
                };
                let _ = tx.send(Some(shared));
                self.in_flight.lock().await.remove(&root);
                outcome
            }
        }
    }

    async fn run(&self, root: &Path, cancel: CancellationToken) -> Result<ScanReport> {
        let store = Arc::clone(&self.store);
        let extractor = Arc::clone(&self.extractor);
        let embedder = Arc::clone(&self.embedder);
        let filter = Arc::clone(&self.filter);
        let snippet_bytes = self.snippet_bytes;
        let batch_size = self.embed_batch_size;
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || {
            scan_root(
                &store,
                extractor.as_ref(),
                embedder.as_ref(),
                &filter,
                snippet_bytes,
                batch_size,
                &root,
                &cancel,
            )
        })
        .await
        .map_err(|e| Error::Internal(format!("scan task: {e}")))?
    }
}

fn mtime_ms(metadata: &std::fs::Metadata) -> Result<i64> {
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

#[allow(clippy::too_many_arguments)]
fn scan_root(
    store: &Arc<FileStore>,
    extractor: &dyn TextExtractor,
    embedder: &dyn Embedder,
    filter: &ScanFilter,
    snippet_bytes: usize,
    batch_size: usize,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    // (file id, snippet) waiting for the next batched embedder call.
    let mut pending: Vec<(i64, String)> = Vec::new();

    // Lexicographic traversal keeps reports identical across scans of an
    // unchanged tree.
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                report.failures += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                report.failures += 1;
                continue;
            }
        };

        if !filter.admits(path, metadata.len()) {
            continue;
        }

        let path_str = path.to_string_lossy().to_string();
        seen.insert(path_str.clone());

        if let Err(e) = process_file(
            store,
            extractor,
            embedder,
            snippet_bytes,
            batch_size,
            path,
            &path_str,
            &metadata,
            &mut pending,
            &mut report,
        ) {
            match e {
                // Store failures are fatal for the whole scan.
                Error::Store(_) | Error::Sqlite(_) | Error::Pool(_) => return Err(e),
                other => {
                    warn!("Failed to process {}: {}", path.display(), other);
                    report.failures += 1;
                }
            }
        }
    }

    flush_embeddings(store, embedder, &mut pending, &mut report)?;

    // Anything still live under this root that the walk did not see is gone
    // from disk; tombstone it.
    let root_str = root.to_string_lossy();
    for file in store.list_live_under(&root_str)? {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !seen.contains(&file.path) {
            store.tombstone(file.id)?;
            report.tombstoned += 1;
        }
    }

    if report.added + report.updated + report.tombstoned > 0 {
        store.bump_scan_epoch()?;
    }

    info!(
        "Scan of {} complete: {} added, {} updated, {} unchanged, {} tombstoned, {} failures",
        root.display(),
        report.added,
        report.updated,
        report.unchanged,
        report.tombstoned,
        report.failures
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn process_file(
    store: &Arc<FileStore>,
    extractor: &dyn TextExtractor,
    embedder: &dyn Embedder,
    snippet_bytes: usize,
    batch_size: usize,
    path: &Path,
    path_str: &str,
    metadata: &std::fs::Metadata,
    pending: &mut Vec<(i64, String)>,
    report: &mut ScanReport,
) -> Result<()> {
    let size = metadata.len() as i64;
    let mtime = mtime_ms(metadata)?;

    let existing = store.get_file_by_path(path_str)?;

    // Stage one: identical (size, mtime) means unchanged without reading
    // a single byte.
    if let Some(file) = &existing {
        if !file.tombstoned && file.size == size && file.last_modified == mtime {
            report.unchanged += 1;
            return Ok(());
        }
    }

    let hash = calculate_file_hash(path)?;

    // Stage two: the mtime drifted but the bytes did not. Refresh the row
    // (upsert reports changed=false) and move on.
    if let Some(file) = &existing {
        if !file.tombstoned && file.hash == hash && file.size == size {
            store.upsert_file(path_str, size, mtime, file.mime.as_deref(), &hash)?;
            report.unchanged += 1;
            return Ok(());
        }
    }

    // New content: extract, register, and queue for embedding. An
    // extractor failure still registers the file, just without text.
    let (extraction, extract_failed) = match extractor.extract(path, snippet_bytes) {
        Ok(extraction) => (extraction, false),
        Err(e) => {
            warn!("Extractor failed on {}: {}", path.display(), e);
            (
                Extraction {
                    mime: None,
                    text: None,
                },
                true,
            )
        }
    };

    let (id, _changed) =
        store.upsert_file(path_str, size, mtime, extraction.mime.as_deref(), &hash)?;

    let was_live = existing.as_ref().map(|f| !f.tombstoned).unwrap_or(false);
    if was_live {
        report.updated += 1;
    } else {
        report.added += 1;
    }
    if extract_failed {
        report.failures += 1;
    }

    match extraction.text {
        Some(text) => {
            pending.push((id, text));
            if pending.len() >= batch_size {
                flush_embeddings(store, embedder, pending, report)?;
            }
        }
        None => {
            // Non-textual content clears any stale snippet and embedding.
            store.put_content(id, "", None)?;
        }
    }

    Ok(())
}

/// Run one batched embedder invocation and store the results. A failed
/// batch keeps the snippets (sans embeddings) and counts each member as a
/// failure; the scan goes on.
fn flush_embeddings(
    store: &Arc<FileStore>,
    embedder: &dyn Embedder,
    pending: &mut Vec<(i64, String)>,
    report: &mut ScanReport,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    match embedder.embed_batch(&texts) {
        Ok(vectors) if vectors.len() == pending.len() => {
            for ((id, text), mut vector) in pending.drain(..).zip(vectors) {
                l2_normalize(&mut vector);
                store.put_content(id, &text, Some(&vector))?;
            }
        }
        Ok(vectors) => {
            warn!(
                "Embedder returned {} vectors for {} texts; keeping snippets only",
                vectors.len(),
                pending.len()
            );
            report.failures += pending.len();
            for (id, text) in pending.drain(..) {
                store.put_content(id, &text, None)?;
            }
        }
        Err(e) => {
            warn!("Batch embedding failed ({} texts): {}", pending.len(), e);
            report.failures += pending.len();
            for (id, text) in pending.drain(..) {
                store.put_content(id, &text, None)?;
            }
        }
    }
    Ok(())
}
