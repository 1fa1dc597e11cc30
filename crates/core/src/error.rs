//! Typed errors for the engine and its columnar store.
//!
//! The teacher threads `Result<T, String>` through its scan/ast/semantic
//! modules; this crate uses `thiserror` enums instead so callers can match on
//! failure kind rather than parse error strings.

use thiserror::Error;

/// Errors surfaced by the store layer (§4.F).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to columnar store at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: lancedb::Error,
    },
    #[error("lancedb error: {0}")]
    Lance(#[from] lancedb::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Top-level errors surfaced by the engine's public operations (§6).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("project path does not exist or is not a directory: {0}")]
    InvalidPath(String),
    #[error("query must not be empty")]
    InvalidQuery,
    #[error("unknown search mode: {0}")]
    InvalidMode(String),
    #[error("limit must be greater than zero")]
    InvalidLimit,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
