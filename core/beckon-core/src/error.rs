//! Error types for beckon-core operations.
//! Daemon request handlers flatten these into string-coded IPC errors at the
//! boundary; inside the library the variants keep context attached.

use std::path::PathBuf;

/// All errors that can occur in beckon-core operations.
#[derive(Debug, thiserror::Error)]
pub enum BeckonError {
    // ─────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("State file path has no parent directory: {0}")]
    NoParentDir(PathBuf),

    #[error("Failed to acquire state lock: {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file verification failed: {path}: expected {expected} bytes, found {found}")]
    ShortWrite {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using BeckonError.
pub type Result<T> = std::result::Result<T, BeckonError>;

// Conversion for string error compatibility
impl From<BeckonError> for String {
    fn from(err: BeckonError) -> String {
        err.to_string()
    }
}
