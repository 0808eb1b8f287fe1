//! Unified error types for Vigil

use thiserror::Error;

/// Unified error type for all Vigil operations
///
/// Probe outcomes (timeouts, HTTP errors, unreachable hosts) are data, not
/// errors: they are recorded on circuits. `VigilError` covers infrastructure
/// failures around the state files and configuration.
#[derive(Error, Debug)]
pub enum VigilError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // State file errors
    #[error("Timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("State file error: {0}")]
    Store(String),

    // Probe plumbing errors (client construction, not probe outcomes)
    #[error("Probe setup error: {0}")]
    Probe(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;
