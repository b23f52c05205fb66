use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LodeError {
    #[error("Storage engine error: {0}")]
    Unknown(String),

    #[error("Database is full: map size limit reached")]
    DatabaseFull,

    #[error("Transaction is full: too many dirty pages")]
    TransactionFull,

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Write attempted on a readonly transaction")]
    WriteOnReadOnly,

    #[error("Environment is closed")]
    EnvironmentClosed,

    #[error("Key or value not found")]
    KeyNotFound,

    #[error("Index {index} out of range for set of {len} values")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Database {0} does not allow duplicate keys")]
    NotSortedSet(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LodeError>;

/// Payload-free discriminant of [`LodeError`]
///
/// Carried by notifications, where the error itself cannot be cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unknown,
    DatabaseFull,
    TransactionFull,
    CommitFailed,
    WriteOnReadOnly,
    EnvironmentClosed,
    KeyNotFound,
    IndexOutOfRange,
    DatabaseNotFound,
    NotSortedSet,
    Io,
    Config,
    Other,
}

impl ErrorKind {
    /// Capacity errors: reported and broadcast, never retried here.
    pub fn is_size_limit(self) -> bool {
        matches!(self, ErrorKind::DatabaseFull | ErrorKind::TransactionFull)
    }

    /// Caller mistakes that fail immediately and must not be retried.
    pub fn is_programmer_error(self) -> bool {
        matches!(
            self,
            ErrorKind::WriteOnReadOnly | ErrorKind::IndexOutOfRange | ErrorKind::NotSortedSet
        )
    }
}

impl LodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LodeError::Unknown(_) => ErrorKind::Unknown,
            LodeError::DatabaseFull => ErrorKind::DatabaseFull,
            LodeError::TransactionFull => ErrorKind::TransactionFull,
            LodeError::CommitFailed(_) => ErrorKind::CommitFailed,
            LodeError::WriteOnReadOnly => ErrorKind::WriteOnReadOnly,
            LodeError::EnvironmentClosed => ErrorKind::EnvironmentClosed,
            LodeError::KeyNotFound => ErrorKind::KeyNotFound,
            LodeError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            LodeError::DatabaseNotFound(_) => ErrorKind::DatabaseNotFound,
            LodeError::NotSortedSet(_) => ErrorKind::NotSortedSet,
            LodeError::Io(_) => ErrorKind::Io,
            LodeError::Config(_) => ErrorKind::Config,
            LodeError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_size_limit(&self) -> bool {
        self.kind().is_size_limit()
    }
}

// Custom Error Types:
//
// Work closures return `lode_core::Result<()>`. Application errors reach
// `LodeError::Other` through anyhow:
//
// env.submit(false, |txn| {
//     let raw = txn.default_db()?.get(b"config")?.ok_or(LodeError::KeyNotFound)?;
//     let parsed: MyConfig = serde_json::from_slice(&raw).map_err(anyhow::Error::from)?;
//     txn.default_db()?.set(b"config", &parsed.bump().to_bytes())
// }, |_| {});
