//! Error types for DocVault.

use thiserror::Error;

/// Which storage ceiling a write would have crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    User,
    Global,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Mime type detection failed: {0}")]
    MimeDetection(String),

    #[error("Quota reached: {0} storage ceiling exceeded")]
    QuotaExceeded(QuotaScope),

    #[error("Archive entry I/O failure: {0}")]
    ArchiveEntryIo(String),

    #[error("OCR process failure: {0}")]
    OcrProcess(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures raised before any metadata or filesystem mutation.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::MimeDetection(_) | Self::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_scope() {
        let err = Error::QuotaExceeded(QuotaScope::Global);
        assert_eq!(err.to_string(), "Quota reached: global storage ceiling exceeded");
        assert!(err.is_precondition());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_precondition());
    }
}
