use thiserror::Error;

/// Result type for stream pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can terminate or prevent a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A buffer configured with `ErrorOnOverflow` was offered an item while full.
    /// Terminal: surfaced to the consumer exactly once.
    #[error("Buffer overflow: capacity {capacity} exceeded by item {seq}")]
    Overflow { capacity: usize, seq: u64 },

    /// The buffer no longer accepts items
    #[error("Buffer is closed")]
    Closed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The producer task panicked or was aborted
    #[error("Producer task failed: {0}")]
    TaskError(String),
}

impl PipelineError {
    /// Whether this error is the terminal overflow fault
    pub fn is_overflow(&self) -> bool {
        matches!(self, PipelineError::Overflow { .. })
    }
}

/// Failure of a single consumer processing step.
///
/// Never aborts a run: the consumer substitutes its fallback value or skips the item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Processing fault: {0}")]
pub struct ProcessingFault(pub String);

impl ProcessingFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
