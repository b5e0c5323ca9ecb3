//! Error types for the synchronizer

use thiserror::Error;

/// Failure while handling one permission-change message
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Session lookup error: {0}")]
    Lookup(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache write error: {0}")]
    Write(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl SyncError {
    /// Short label used as a structured log field
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Lookup(_) => "lookup",
            Self::Serialization(_) => "serialization",
            Self::Write(_) => "write",
            Self::Queue(_) => "queue",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Whether the same message could succeed on a later delivery
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::Serialization(_))
    }
}

/// Result type for synchronizer operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(!SyncError::Decode("bad".into()).is_transient());
        assert!(!SyncError::Serialization("bad".into()).is_transient());
        assert!(SyncError::Lookup("down".into()).is_transient());
        assert!(SyncError::Write("down".into()).is_transient());
        assert!(SyncError::Queue("down".into()).is_transient());
        assert!(SyncError::Timeout("process".into()).is_transient());
    }

    #[test]
    fn test_error_kind_and_display() {
        let err = SyncError::Write("connection reset".into());
        assert_eq!(err.kind(), "write");
        assert_eq!(err.to_string(), "Cache write error: connection reset");
    }
}
