//! Error types for Kestrel

use thiserror::Error;

/// Result type alias for Kestrel operations
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Kestrel error types
#[derive(Error, Debug)]
pub enum KestrelError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Short read while decoding a framed block segment
    #[error("Truncated block: {0}")]
    TruncatedBlock(String),

    /// Short read while decoding the header trailer or footer
    #[error("Truncated header: {0}")]
    TruncatedHeader(String),

    /// Value or time codec failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// An engine constructor was registered twice under one name
    #[error("Engine already registered: {0}")]
    DuplicateRegistration(String),

    /// Entry rejected at insert time
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Disk file name does not follow `<minKey>-<maxKey>`
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Malformed frame found while replaying the WAL
    #[error("WAL recovery error: {0}")]
    WalRecovery(String),

    /// Object store failure
    #[error("Remote error: {0}")]
    Remote(#[from] object_store::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KestrelError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, KestrelError::Io(_) | KestrelError::Remote(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            KestrelError::TruncatedBlock(_)
                | KestrelError::TruncatedHeader(_)
                | KestrelError::Codec(_)
                | KestrelError::WalRecovery(_)
        )
    }
}
