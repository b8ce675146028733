//! Error types for seispick

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PickError {
    /// Invalid algorithm parameters, rejected before any computation runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid position: sample {time} is outside a signal of {len} samples")]
    InvalidPosition { time: i64, len: usize },

    #[error("Processing aborted")]
    Aborted,

    #[error("Worker failure: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl PickError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PickError>;
