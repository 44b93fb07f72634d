use thiserror::Error;

/// Main error type for Vellum storage operations
#[derive(Error, Debug)]
pub enum VellumError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corrupt index file '{file}': {reason}")]
    Corruption { file: String, reason: String },

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is still in use: {0}")]
    FileInUse(String),

    #[error("Write lock '{0}' is held by another writer")]
    LockHeld(String),

    #[error("Lock self-test failed for directory: {0}")]
    LockSelfTest(String),

    #[error("Merge aborted: {0}")]
    MergeAborted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for Vellum operations
pub type Result<T> = std::result::Result<T, VellumError>;

impl VellumError {
    /// Build a corruption error for a named index file.
    pub fn corrupt(file: impl Into<String>, reason: impl Into<String>) -> Self {
        VellumError::Corruption {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Corruption and lock self-test failures are fatal to the affected
    /// segment or directory and must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VellumError::Corruption { .. } | VellumError::LockSelfTest(_)
        )
    }
}
