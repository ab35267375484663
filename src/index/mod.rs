// Vector Index Module
//
// Approximate nearest neighbor search over content embeddings using HNSW
// (Hierarchical Navigable Small World). The store remains the source of
// truth; this structure only manages the HNSW graph, the mapping between
// HNSW slots and file ids, and the rebuild lifecycle.
//
// Staleness is tracked with epochs: the store bumps its scan epoch on any
// write that could invalidate the index, and `ensure_current` rebuilds
// lazily when the cached indexed epoch falls behind. The served graph is
// swapped atomically behind an `Arc`, so in-flight queries finish against
// the instance they started with.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use hnsw_rs::hnswio::{HnswIo, ReloadOptions};
use hnsw_rs::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::FileStore;
use crate::embeddings::l2_normalize;
use crate::error::{Error, Result};

const HNSW_MAX_LAYERS: usize = 16; // hnsw_rs NB_LAYER_MAX; required for dump persistence
const HNSW_MAX_CONNECTIONS: usize = 32;
const HNSW_EF_CONSTRUCTION: usize = 400;

const INDEX_BASENAME: &str = "ann_index";
const META_FILENAME: &str = "index.meta";
const META_MAGIC: [u8; 4] = *b"KNRX";
const META_VERSION: u32 = 1;

/// A built or loaded HNSW graph together with its id mapping.
///
/// `hnsw` is `None` when fewer than two embeddings exist; queries against
/// such an index return nothing, per the contract.
struct LoadedIndex {
    hnsw: Option<Hnsw<'static, f32, DistCosine>>,
    /// HNSW slot -> file id.
    ids: Vec<i64>,
    /// Kept alive for indexes loaded from disk; with `datamap: false` the
    /// graph owns its data, so this is belt-and-suspenders only.
    _io: Option<Box<HnswIo>>,
}

impl LoadedIndex {
    fn empty() -> Self {
        Self {
            hnsw: None,
            ids: Vec::new(),
            _io: None,
        }
    }
}

/// HNSW index manager with epoch-guarded lazy rebuild.
pub struct VectorIndex {
    dimensions: usize,
    dir: PathBuf,
    served: RwLock<Option<Arc<LoadedIndex>>>,
    /// Scan epoch the served instance was built against; -1 before any build.
    indexed_epoch: AtomicI64,
    /// Coalesces concurrent rebuilds onto a single worker.
    rebuild_gate: tokio::sync::Mutex<()>,
}

impl VectorIndex {
    pub fn new(dimensions: usize, dir: PathBuf) -> Self {
        Self {
            dimensions,
            dir,
            served: RwLock::new(None),
            indexed_epoch: AtomicI64::new(-1),
            rebuild_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Epoch the served instance was built against; -1 before any build.
    pub fn indexed_epoch(&self) -> i64 {
        self.indexed_epoch.load(Ordering::Acquire)
    }

    fn served(&self) -> Option<Arc<LoadedIndex>> {
        self.served
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap(&self, index: LoadedIndex, epoch: i64) {
        *self
            .served
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(index));
        self.indexed_epoch.store(epoch, Ordering::Release);
    }

    /// Nearest neighbors of the query vector, as `(file_id, cosine)` in
    /// descending similarity. Returns an empty list when fewer than two
    /// embeddings are indexed; `k` is clamped to the indexed count.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        if vector.len() != self.dimensions {
            return Err(Error::Index(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }

        let Some(served) = self.served() else {
            return Ok(Vec::new());
        };
        let Some(hnsw) = served.hnsw.as_ref() else {
            return Ok(Vec::new());
        };

        let k = k.min(served.ids.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut query = vector.to_vec();
        l2_normalize(&mut query);

        // Search wider than k for better recall.
        let ef_search = (k * 2).max(50);
        let neighbours = hnsw.search(&query, k, ef_search);

        let mut results = Vec::with_capacity(neighbours.len());
        for neighbour in neighbours {
            let slot = neighbour.d_id;
            let Some(&file_id) = served.ids.get(slot) else {
                warn!("HNSW returned out-of-range slot {}", slot);
                continue;
            };
            // DistCosine is 1 - cos over normalized vectors.
            let similarity = 1.0 - neighbour.distance;
            results.push((file_id, similarity));
        }

        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }

    /// Rebuild from the store if the scan epoch moved; no-op otherwise.
    ///
    /// Concurrent callers coalesce onto one rebuild. A failed rebuild
    /// surfaces the error and leaves the last good instance serving.
    pub async fn ensure_current(
        &self,
        store: &Arc<FileStore>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let epoch = store.scan_epoch()?;
        if self.indexed_epoch() == epoch && self.served().is_some() {
            return Ok(());
        }

        let _gate = self.rebuild_gate.lock().await;
        // Another caller may have finished the rebuild while we waited.
        let epoch = store.scan_epoch()?;
        if self.indexed_epoch() == epoch && self.served().is_some() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let store = Arc::clone(store);
        let dimensions = self.dimensions;
        let dir = self.dir.clone();
        let built = tokio::task::spawn_blocking(move || -> Result<LoadedIndex> {
            let rows = store.load_embeddings()?;
            let mut index = build_index(rows, dimensions);
            if let Err(e) = persist_index(&mut index, &dir, epoch) {
                warn!("Failed to persist ANN index: {}", e);
            }
            Ok(index)
        })
        .await
        .map_err(|e| Error::Internal(format!("index rebuild task: {}", e)))??;

        let indexed = built.ids.len();
        self.swap(built, epoch);
        info!("ANN index rebuilt: {} vectors at epoch {}", indexed, epoch);
        Ok(())
    }

    /// Try to serve the persisted index from disk.
    ///
    /// A missing, corrupt, or version-incompatible dump is not an error;
    /// it just leaves the index dirty so the first query rebuilds it.
    pub fn load_from_disk(&self) -> bool {
        match load_index(&self.dir) {
            Ok(Some((index, epoch))) => {
                let count = index.ids.len();
                self.swap(index, epoch);
                info!(
                    "Loaded ANN index from disk: {} vectors at epoch {}",
                    count, epoch
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Ignoring unusable ANN index on disk: {}", e);
                false
            }
        }
    }
}

/// Build an HNSW graph over normalized embeddings. Vectors with the wrong
/// dimension are skipped with a warning.
fn build_index(rows: Vec<(i64, Vec<f32>)>, dimensions: usize) -> LoadedIndex {
    let mut ids = Vec::with_capacity(rows.len());
    let mut vectors = Vec::with_capacity(rows.len());
    for (id, mut vector) in rows {
        if vector.len() != dimensions {
            warn!(
                "Skipping embedding for file id {}: {} dimensions, expected {}",
                id,
                vector.len(),
                dimensions
            );
            continue;
        }
        l2_normalize(&mut vector);
        if vector.iter().all(|&x| x == 0.0) {
            warn!("Skipping zero-magnitude embedding for file id {}", id);
            continue;
        }
        ids.push(id);
        vectors.push(vector);
    }

    if ids.len() < 2 {
        debug!("Not enough embeddings to build an ANN graph ({})", ids.len());
        return LoadedIndex {
            hnsw: None,
            ids,
            _io: None,
        };
    }

    let mut hnsw = Hnsw::<'static, f32, DistCosine>::new(
        HNSW_MAX_CONNECTIONS,
        ids.len(),
        HNSW_MAX_LAYERS,
        HNSW_EF_CONSTRUCTION,
        DistCosine {},
    );

    let data_for_insertion: Vec<(&Vec<f32>, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(slot, vector)| (vector, slot))
        .collect();
    hnsw.parallel_insert(&data_for_insertion);
    hnsw.set_searching_mode(true);

    LoadedIndex {
        hnsw: Some(hnsw),
        ids,
        _io: None,
    }
}

/// Write the graph dump, id mapping, and meta header.
fn persist_index(index: &mut LoadedIndex, dir: &Path, epoch: i64) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mapping_path = dir.join(format!("{INDEX_BASENAME}.id_mapping.json"));
    let mapping_json = serde_json::to_string(&index.ids)
        .map_err(|e| Error::Index(format!("id mapping serialization: {e}")))?;
    std::fs::write(&mapping_path, mapping_json)?;

    if let Some(hnsw) = index.hnsw.as_mut() {
        // The searching flag blocks the write paths used by the dump.
        hnsw.set_searching_mode(false);
        let dump_result = hnsw.file_dump(dir, INDEX_BASENAME);
        hnsw.set_searching_mode(true);
        dump_result.map_err(|e| Error::Index(format!("HNSW dump failed: {}", e)))?;
    }

    let mut meta = Vec::with_capacity(16);
    meta.extend_from_slice(&META_MAGIC);
    meta.extend_from_slice(&META_VERSION.to_le_bytes());
    meta.extend_from_slice(&epoch.to_le_bytes());
    std::fs::write(dir.join(META_FILENAME), meta)?;

    debug!(
        "Persisted ANN index ({} vectors) to {}",
        index.ids.len(),
        dir.display()
    );
    Ok(())
}

/// Load a persisted index. `Ok(None)` means nothing usable is on disk.
/// Dimension mismatches between the dump and the configuration surface on
/// the first query.
fn load_index(dir: &Path) -> Result<Option<(LoadedIndex, i64)>> {
    let meta_path = dir.join(META_FILENAME);
    if !meta_path.exists() {
        return Ok(None);
    }

    let meta = std::fs::read(&meta_path)?;
    if meta.len() != 16 || meta[0..4] != META_MAGIC {
        return Err(Error::Index("index meta file is corrupt".into()));
    }
    let version = u32::from_le_bytes([meta[4], meta[5], meta[6], meta[7]]);
    if version != META_VERSION {
        return Err(Error::Index(format!(
            "index format version {} is incompatible (expected {})",
            version, META_VERSION
        )));
    }
    let epoch = i64::from_le_bytes(meta[8..16].try_into().expect("sized slice"));

    let mapping_path = dir.join(format!("{INDEX_BASENAME}.id_mapping.json"));
    let ids: Vec<i64> = serde_json::from_str(&std::fs::read_to_string(&mapping_path)?)
        .map_err(|e| Error::Index(format!("id mapping is corrupt: {}", e)))?;

    if ids.len() < 2 {
        return Ok(Some((LoadedIndex::empty(), epoch)));
    }

    let graph_path = dir.join(format!("{INDEX_BASENAME}.hnsw.graph"));
    let data_path = dir.join(format!("{INDEX_BASENAME}.hnsw.data"));
    if !graph_path.exists() || !data_path.exists() {
        return Err(Error::Index("HNSW dump files are missing".into()));
    }

    let mut hnsw_io = HnswIo::new(dir, INDEX_BASENAME);
    // Importantly: datamap stays false, so the loaded graph owns its data.
    hnsw_io.set_options(ReloadOptions::default());
    let loaded: Hnsw<'_, f32, DistCosine> = hnsw_io
        .load_hnsw::<f32, DistCosine>()
        .map_err(|e| Error::Index(format!("failed to load HNSW dump: {}", e)))?;

    // SAFETY: with datamap disabled, load_hnsw copies all vector data into
    // the graph's own heap buffers; the borrow of `hnsw_io` in the returned
    // lifetime is vacuous. We additionally keep the HnswIo alive alongside
    // the graph. If hnsw_rs ever defaults to mmap this must be revisited.
    let hnsw: Hnsw<'static, f32, DistCosine> = unsafe { std::mem::transmute(loaded) };

    Ok(Some((
        LoadedIndex {
            hnsw: Some(hnsw),
            ids,
            _io: Some(Box::new(hnsw_io)),
        },
        epoch,
    )))
}
