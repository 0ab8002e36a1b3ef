use thiserror::Error;

/// Type alias for Result with SummaryError
pub type Result<T> = std::result::Result<T, SummaryError>;

/// Error types for the inbox summarization system
#[derive(Error, Debug)]
pub enum SummaryError {
    /// Invalid configuration (rule set, concurrency, timeout, patterns)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Summarization backend did not answer within the per-call timeout
    #[error("Summarization backend timed out after {seconds} seconds")]
    BackendTimeout { seconds: u64 },

    /// Summarization backend reported a failure
    #[error("Summarization backend error: {0}")]
    BackendError(String),

    /// Summarization backend executable could not be started
    #[error("Summarization backend not found: {0}")]
    BackendNotFound(String),

    /// Mail source could not supply threads
    #[error("Mail source error: {0}")]
    MailSourceError(String),

    /// A thread record could not be turned into a Thread
    #[error("Invalid thread: {0}")]
    InvalidThread(String),

    /// Cache storage problem (only surfaced by maintenance operations)
    #[error("Cache error: {0}")]
    CacheError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SummaryError {
    /// Errors that belong to a single thread's summarization and must be
    /// captured on its result instead of aborting the batch
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            SummaryError::BackendTimeout { .. }
                | SummaryError::BackendError(_)
                | SummaryError::BackendNotFound(_)
        )
    }

    /// Errors that must stop a run before any work starts
    pub fn is_fatal(&self) -> bool {
        !self.is_item_scoped()
    }
}
