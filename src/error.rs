use std::fmt;

/// Discriminated error kinds surfaced at the core's operation boundary.
///
/// Every variant corresponds to one of the kinds listed in the external
/// interfaces section of the spec this engine implements; callers match on
/// kind rather than parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object disposed")]
    ObjectDisposed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("not found")]
    NotFound,

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("unauthorized access")]
    UnauthorizedAccess,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("bad credentials")]
    BadCredentials,

    #[error("tampered data detected")]
    Tampered,

    #[error("journal replay failed: {0}")]
    JournalReplayFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(msg: impl fmt::Display) -> Self {
        Error::CorruptFile(msg.to_string())
    }

    pub fn invalid_argument(msg: impl fmt::Display) -> Self {
        Error::InvalidArgument(msg.to_string())
    }

    pub fn invalid_operation(msg: impl fmt::Display) -> Self {
        Error::InvalidOperation(msg.to_string())
    }

    pub fn unsupported(msg: impl fmt::Display) -> Self {
        Error::UnsupportedFeature(msg.to_string())
    }
}
