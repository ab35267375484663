//! Engine configuration.
//!
//! The whole configuration is one plain struct handed to each constructor;
//! there are no process-wide singletons. The CLI adapter reads it from a
//! `config.yaml`, everything else receives it by value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the database file and the ANN index files.
    pub data_dir: PathBuf,
    pub scan: ScanConfig,
    pub embeddings: EmbeddingConfig,
    pub ranking: RankingConfig,
    pub activity: ActivityConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Roots scanned when none is given on the command line.
    pub roots: Vec<PathBuf>,
    /// Lowercased extensions admitted by the scanner.
    pub allowed_extensions: Vec<String>,
    /// Glob patterns for paths the scanner skips entirely.
    pub ignore: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_size: u64,
    /// Upper bound on the stored text snippet, in bytes.
    pub snippet_bytes: usize,
    /// How many snippets are embedded per model invocation.
    pub embed_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_name: String,
    /// Vector dimension `d`; every stored embedding has exactly this length.
    pub dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Weight of the semantic factor.
    pub alpha: f64,
    /// Weight of the recency factor.
    pub beta: f64,
    /// Weight of the co-occurrence factor.
    pub gamma: f64,
    /// Decay constant (days) for the last-modified recency term.
    pub modified_decay_days: f64,
    /// Decay constant (days) for the last-accessed recency term.
    pub accessed_decay_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Lookback window for co-occurrence pairing, in seconds.
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size of the SQLite connection pool.
    pub pool_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".kindred"),
            scan: ScanConfig::default(),
            embeddings: EmbeddingConfig::default(),
            ranking: RankingConfig::default(),
            activity: ActivityConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            allowed_extensions: [
                "txt", "md", "markdown", "rst", "csv", "json", "yaml", "yml", "toml", "xml",
                "html", "htm", "js", "ts", "py", "rs", "go", "java", "c", "h", "cpp", "sh",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignore: [
                "**/.git/**",
                "**/node_modules/**",
                "**/target/**",
                "**/__pycache__/**",
                "**/.kindred/**",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_size: 10 * 1024 * 1024,
            snippet_bytes: 8192,
            embed_batch_size: 32,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "fnv1a-hash".to_string(),
            dim: 384,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.2,
            gamma: 0.15,
            modified_decay_days: 30.0,
            accessed_decay_days: 15.0,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { window_secs: 300 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { pool_size: 4 }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embeddings.dim == 0 {
            return Err(Error::Config("embedding dimension must be > 0".into()));
        }
        if self.scan.snippet_bytes == 0 {
            return Err(Error::Config("snippet_bytes must be > 0".into()));
        }
        if self.scan.embed_batch_size == 0 {
            return Err(Error::Config("embed_batch_size must be > 0".into()));
        }
        if self.store.pool_size == 0 {
            return Err(Error::Config("pool_size must be > 0".into()));
        }
        if self.ranking.modified_decay_days <= 0.0 || self.ranking.accessed_decay_days <= 0.0 {
            return Err(Error::Config("recency decay constants must be > 0".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("files.db")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}
