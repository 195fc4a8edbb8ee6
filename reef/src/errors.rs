use std::fmt;
use std::io;
use std::result;

/// Errors surfaced by chunk planning, storage, and benchmarking.
///
/// Every error is reported to the caller immediately. Nothing in this crate retries or cleans up
/// partially written chunks on its own.
///
#[derive(Debug)]
pub enum Error {
    /// A requested chunk size is non-positive or cannot be applied to its dimension.
    InvalidChunkSize(String),

    /// No store, array, or coordinate value exists at the requested location.
    NotFound(String),

    /// Credentials for a remote store are missing or were rejected.
    AuthenticationError(String),

    /// A store's declared structure cannot be interpreted as a dataset, or two operands of a
    /// merge/append do not agree.
    SchemaMismatch(String),

    /// Persistence was interrupted. The store may hold partially written chunks.
    StorageWriteFailure(String),

    /// An append would duplicate a coordinate value already present along the append dimension.
    DuplicateCoordinate(String),

    /// A create-mode write found an existing store at the target location.
    AlreadyExists(String),

    /// The requested configuration is outside this crate's fixed choices.
    Unsupported(String),

    /// No variable or dimension with the given name.
    BadName(String),

    IO(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidChunkSize(msg) => write!(f, "invalid chunk size: {msg}"),
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::AuthenticationError(msg) => write!(f, "authentication error: {msg}"),
            Error::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            Error::StorageWriteFailure(msg) => write!(f, "storage write failure: {msg}"),
            Error::DuplicateCoordinate(msg) => write!(f, "duplicate coordinate: {msg}"),
            Error::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::BadName(msg) => write!(f, "bad name: {msg}"),
            Error::IO(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IO(err),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound(err.to_string()),
            object_store::Error::AlreadyExists { .. } => Self::AlreadyExists(err.to_string()),
            _ => Self::StorageWriteFailure(err.to_string()),
        }
    }
}

impl From<zarrs::storage::StorageError> for Error {
    fn from(err: zarrs::storage::StorageError) -> Self {
        Self::StorageWriteFailure(err.to_string())
    }
}

impl From<zarrs::array::ArrayError> for Error {
    fn from(err: zarrs::array::ArrayError) -> Self {
        match err {
            zarrs::array::ArrayError::StorageError(err) => Self::from(err),
            err => Self::SchemaMismatch(err.to_string()),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
