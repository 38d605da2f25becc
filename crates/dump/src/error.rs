use shell_core::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("{0}")]
    InvalidOption(String),

    #[error("Unable to acquire global read lock: {0}")]
    GlobalReadLock(#[source] SessionError),

    #[error("Unable to lock tables: {0}")]
    LockTables(#[source] SessionError),

    /// At least one worker failed; the individual errors were already reported.
    #[error("Fatal error during dump")]
    Fatal,

    #[error("Interrupted by user")]
    Interrupted,

    #[error("{0}")]
    Runtime(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DumpError {
    pub fn invalid_option(message: impl Into<String>) -> Self {
        DumpError::InvalidOption(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        DumpError::Runtime(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;
