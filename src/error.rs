//! Error types for the wakeline pipeline

use thiserror::Error;

/// Result type alias for wakeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the wakeline pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Model load failure — fatal to the detector using the model
    #[error("model error: {0}")]
    Model(String),

    /// Detector used before its models were loaded
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Transient inference failure — recovered by skipping the affected window
    #[error("inference error: {0}")]
    Inference(String),

    /// Input tensor dimensions disagree with the model's declared shape
    ///
    /// Carries the temporal depth the model expects and the depth that was
    /// supplied, so callers can resize their buffers instead of parsing
    /// error strings.
    #[error("shape mismatch: model expects temporal depth {expected}, got {actual}")]
    ShapeMismatch {
        /// Depth declared by the model
        expected: usize,
        /// Depth that was supplied
        actual: usize,
    },

    /// Worker failure — in-flight dispatches reject with this, retryable
    #[error("worker error: {0}")]
    Worker(String),

    /// Dispatch timed out — retryable, distinct from worker failure
    #[error("dispatch timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Dispatch cancelled by session stop
    #[error("dispatch cancelled")]
    Cancelled,

    /// Execution chain exhausted — no further fallback mode available
    #[error("execution chain exhausted at {0}")]
    ChainExhausted(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the caller may retry the operation that produced this error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Worker(_) | Self::Timeout(_) | Self::Inference(_))
    }
}
