//! Error types for the RL core library

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Malformed state, action, reward or done flag passed into the learning core
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Not enough buffered data for the requested operation yet
    #[error("Insufficient data: required {required}, available {available}")]
    InsufficientData {
        /// Number of items the operation needs
        required: usize,
        /// Number of items currently held
        available: usize,
    },

    /// Non-finite parameters or losses detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Checkpoint read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Environment or physics collaborator errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RLError {
    /// Whether the caller should simply wait and retry later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;
