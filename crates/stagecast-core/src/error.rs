//! Error types for Stagecast.

use thiserror::Error;

/// Main error type for channel, pipeline and device operations.
#[derive(Error, Debug)]
pub enum StageError {
    /// Detected at construction/setup time. Aborts only the producer or
    /// consumer being set up.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A producer factory does not handle these load parameters. The
    /// registry catches this and tries the next factory.
    #[error("Invalid producer for parameters: {0}")]
    InvalidProducer(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    /// A buffer was accessed or released after its reference count hit zero.
    #[error("Buffer {label} used after final release")]
    BufferReleased { label: String },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Whether the registry should fall through to the next producer factory.
    pub fn is_invalid_producer(&self) -> bool {
        matches!(self, Self::InvalidProducer(_))
    }
}

/// Result type alias for Stagecast operations.
pub type Result<T> = std::result::Result<T, StageError>;
