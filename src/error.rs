//! Error types for the Memcast model.

use thiserror::Error;

/// Result type for Memcast operations.
pub type MemcastResult<T> = Result<T, MemcastError>;

/// Errors that can occur during Memcast model operations.
#[derive(Debug, Error)]
pub enum MemcastError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Not enough history before `current_time` to sample a full window
    /// and observe the target that follows it
    #[error(
        "cannot construct memory: current time {current_time} leaves no \
         fully observed window (window size {window_size})"
    )]
    InsufficientHistory {
        current_time: usize,
        window_size: usize,
    },

    /// The requested starting timestep leaves no data to train on
    #[error(
        "insufficient data: training would start at timestep {start_time} \
         but the series has only {len} timesteps"
    )]
    InsufficientData { start_time: usize, len: usize },

    /// Feature and target sequences are not aligned
    #[error("series mismatch: {features} feature rows vs {targets} targets")]
    SeriesMismatch { features: usize, targets: usize },

    /// Memory was read before any build
    #[error("memory has not been built - call build_memory first")]
    EmptyMemory,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemcastError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
