//! Error types for the floodgate crate.

use thiserror::Error;

/// Main error type for floodgate operations.
///
/// The limiter core itself is infallible (every operation returns a value);
/// errors only arise at the configuration-loading and guard surfaces.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A gated operation was rejected because its quota is exhausted
    #[error("Rate limit exceeded for key: {key}")]
    RateLimited {
        /// The client key whose bucket ran dry
        key: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
