use thiserror::Error;

/// Errors from execution log operations.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt log record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("log entries out of order: busSeq {found} follows {previous}")]
    OutOfOrder { previous: u64, found: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("log lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        LogError::Serialization(e.to_string())
    }
}
