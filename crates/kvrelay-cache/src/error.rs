//! Cache layer error types

use thiserror::Error;

/// Cache layer errors
///
/// Serialization and compression failures never escape `get`/`set`; they are
/// logged and the operation degrades to a miss or a skipped insert.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error for key '{key}': {message}")]
    Serialization { key: String, message: String },

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Invalid cache configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
