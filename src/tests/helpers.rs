//! Shared test fixtures: temp workspaces and engine construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::embeddings::HashingEmbedder;
use crate::engine::Engine;
use crate::extract::PlainTextExtractor;

/// Engine configuration rooted in a temp directory.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        data_dir: dir.join(".kindred"),
        ..EngineConfig::default()
    }
}

/// An engine over a fresh temp data dir with the built-in extractor and
/// the deterministic hashing embedder.
pub fn test_engine(dir: &Path) -> Engine {
    let config = test_config(dir);
    let dim = config.embeddings.dim;
    Engine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(HashingEmbedder::new(dim)),
    )
    .expect("engine construction")
}

/// Create a workspace directory for scanning.
pub fn workspace() -> TempDir {
    tempfile::tempdir().expect("temp workspace")
}

/// Write a file and return its canonical path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, contents).expect("write test file");
    path.canonicalize().expect("canonicalize test file")
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
