use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
///
/// Every variant maps to a stable short code that crosses the adapter
/// boundary as `{code, message}`; stack traces never do.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("embedder error: {0}")]
    Embedder(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("index error: {0}")]
    Index(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable short code for the adapter boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io_error",
            Error::Decode(_) => "decode_error",
            Error::Extractor(_) => "extractor_error",
            Error::Embedder(_) => "embedder_error",
            Error::Store(_) | Error::Sqlite(_) | Error::Pool(_) => "store_error",
            Error::Index(_) => "index_error",
            Error::Config(_) => "invalid_input",
            Error::Cancelled => "cancelled",
            Error::Internal(_) => "internal",
        }
    }

    /// Structured `{code, message}` envelope for adapters.
    pub fn envelope(&self) -> serde_json::Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}
