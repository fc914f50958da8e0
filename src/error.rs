use std::io;
use std::result;

use thiserror::Error;

use crate::key::KeyType;

/// Custom result type for binding operations
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the binding.
///
/// Engine conditions keep the numeric codes LMDB assigns them (see
/// [`Error::code`]); everything else is a validation failure detected before
/// the engine is touched.
#[derive(Debug, Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("MDB_KEYEXIST: Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("MDB_NOTFOUND: No matching key/data pair found")]
    NotFound,
    /// Database file is corrupted
    #[error("MDB_CORRUPTED: Located page was wrong type")]
    Corrupted,
    /// Database version mismatch
    #[error("MDB_VERSION_MISMATCH: Database environment version mismatch")]
    VersionMismatch,
    /// File is not a valid data file
    #[error("MDB_INVALID: File is not an LMDB file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("MDB_MAP_FULL: Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("MDB_DBS_FULL: Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("MDB_READERS_FULL: Environment maxreaders limit reached")]
    ReadersFull,
    /// Operation and DB incompatible
    #[error("MDB_INCOMPATIBLE: Operation and DB incompatible, or DB flags changed")]
    Incompatible,
    /// Transaction must abort, has a child, or is invalid
    #[error("MDB_BAD_TXN: Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("MDB_BAD_VALSIZE: Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("MDB_BAD_DBI: The specified DBI was changed unexpectedly")]
    BadDbi,
    /// Underlying file system error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Environment was opened read-only
    #[error("Permission denied: environment is read-only")]
    EnvReadOnly,
    /// Operation on a closed environment
    #[error("The environment is already closed.")]
    EnvClosed,
    /// Environment path is invalid
    #[error("Invalid environment path")]
    EnvInvalidPath,
    /// Environment map size is invalid
    #[error("Size must be a multiple of the page size ({0} bytes).")]
    EnvInvalidMapSize(usize),
    /// Environment max readers value is invalid
    #[error("Invalid maximum readers value")]
    EnvInvalidMaxReaders,
    /// Another handle or process holds the environment's lock
    #[error("The environment is locked by another handle")]
    EnvLocked,
    /// Environment flags cannot be modified after open
    #[error("Environment flags cannot be modified")]
    EnvFlagsImmutable,
    /// Operation on a committed or aborted transaction
    #[error("The transaction is already closed.")]
    TxnClosed,
    /// Write attempted through a read-only transaction
    #[error("Permission denied: transaction is read-only")]
    TxnReadOnly,
    /// Reset/renew attempted on a write transaction
    #[error("Only read-only transactions can be reset or renewed")]
    TxnNotReadOnly,
    /// Another write transaction is live on this environment
    #[error("A write transaction is already active on this environment")]
    WriterBusy,
    /// Resize attempted while transactions hold snapshots
    #[error("Cannot resize while transactions are attached (writer: {writer}, readers: {readers})")]
    TransactionsAttached {
        /// Whether a write transaction is live
        writer: bool,
        /// Number of live read transactions
        readers: usize,
    },
    /// Key does not match the database key type
    #[error("Invalid key. Expected a {expected} key but got a {found} key")]
    KeyTypeMismatch {
        /// Key type fixed on the database or cursor
        expected: KeyType,
        /// Key type of the supplied key
        found: KeyType,
    },
    /// More than one key representation was requested
    #[error("Only one of keyIsString, keyIsUint32, keyIsUint64 and keyIsBuffer can be specified")]
    ConflictingKeyTypes,
    /// Input cannot be used as a key
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// Stored bytes do not decode as the requested type
    #[error("Malformed value: {0}")]
    MalformedValue(&'static str),
    /// Unknown value type discriminant
    #[error("Unknown value type discriminant {0}")]
    UnknownValueType(u8),
    /// Database handle belongs to another environment
    #[error("Database handle belongs to a different environment")]
    ForeignDatabase,
    /// Cursor has no current position
    #[error("Cursor is not positioned")]
    CursorUnpositioned,
    /// Background worker ended without reporting completion
    #[error("Background worker terminated before completing")]
    WorkerLost,
}

impl Error {
    /// LMDB-compatible numeric code for engine errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::KeyExist => Some(-30799),
            Error::NotFound => Some(-30798),
            Error::Corrupted => Some(-30796),
            Error::VersionMismatch => Some(-30794),
            Error::Invalid => Some(-30793),
            Error::MapFull => Some(-30792),
            Error::DbsFull => Some(-30791),
            Error::ReadersFull => Some(-30790),
            Error::Incompatible => Some(-30784),
            Error::BadTxn => Some(-30782),
            Error::BadValSize => Some(-30781),
            Error::BadDbi => Some(-30780),
            Error::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// True for failures detected before the engine was called.
    pub fn is_validation(&self) -> bool {
        self.code().is_none() && !matches!(self, Error::Io(_) | Error::EnvLocked | Error::WorkerLost)
    }
}
