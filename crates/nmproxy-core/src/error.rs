//! Error types for the `nmproxy` core library.

use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `nmproxy` setup operations.
///
/// Frame-level failures have their own types in [`crate::framing`]; this enum
/// covers what can go wrong before any frame is relayed.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging could not be initialised
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
