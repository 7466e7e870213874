//! Partitioned error kinds for every component of the engine.
//!
//! Every fallible operation in this crate returns `crate::error::Result<T>`.
//! No error is ever silently swallowed: mid-stream I/O or codec failures
//! transition a query to `Failed` (see `crate::query`) rather than being
//! dropped.

pub type Result<T> = std::result::Result<T, Error>;
pub type PassiveResult = Result<()>;

pub use std::io::Error as IoError;
pub use std::io::Result as IoResult;


/// The reason a `Vfs` call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Timeout,
    Other,
}

/// The reason a `Codec` call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// The codec variant is a recognized enum member but has no implementation
    /// in this crate (mirrors the teacher library's unimplemented `B44`/`DWAA` kinds).
    NotSupported,
    /// Decompression produced a different byte count than the tile declared.
    SizeMismatch,
    /// The underlying compressor/decompressor rejected the bytes.
    Malformed,
}

#[derive(Debug)] // TODO derive Display?
pub enum Error {
    Schema(String),
    Query(String),
    StorageManager(String),
    Tile(String),
    Vfs(VfsErrorKind, String),
    Codec(CodecErrorKind, String),
    KvQuery(String),

    /// A query was interrupted via its cooperative cancellation flag (§5).
    Interrupted,

    /// Wraps I/O errors from VFS backends that do not themselves distinguish kinds.
    Io(IoError),
}

impl Error {
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Error::Query(message.into())
    }

    pub fn storage_manager(message: impl Into<String>) -> Self {
        Error::StorageManager(message.into())
    }

    pub fn tile(message: impl Into<String>) -> Self {
        Error::Tile(message.into())
    }

    pub fn vfs(kind: VfsErrorKind, message: impl Into<String>) -> Self {
        Error::Vfs(kind, message.into())
    }

    pub fn codec(kind: CodecErrorKind, message: impl Into<String>) -> Self {
        Error::Codec(kind, message.into())
    }

    pub fn kv_query(message: impl Into<String>) -> Self {
        Error::KvQuery(message.into())
    }

    /// True for statuses a client can recover from by resubmitting with
    /// different inputs (as opposed to a hard failure of the backing store).
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Schema(_) | Error::Query(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Schema(message) => write!(formatter, "schema error: {}", message),
            Error::Query(message) => write!(formatter, "query error: {}", message),
            Error::StorageManager(message) => write!(formatter, "storage manager error: {}", message),
            Error::Tile(message) => write!(formatter, "tile error: {}", message),
            Error::Vfs(kind, message) => write!(formatter, "vfs error ({:?}): {}", kind, message),
            Error::Codec(kind, message) => write!(formatter, "codec error ({:?}): {}", kind, message),
            Error::KvQuery(message) => write!(formatter, "kv query error: {}", message),
            Error::Interrupted => write!(formatter, "query was interrupted"),
            Error::Io(error) => write!(formatter, "io error: {}", error),
        }
    }
}

impl std::error::Error for Error {}

/// Enable using the `?` operator on io::Result
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}
