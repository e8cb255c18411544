use std::io;
use std::os::raw::c_int;
use std::result;

/// Custom result type for batchmdb operations
pub type Result<T> = result::Result<T, Error>;

/// Errors reported by the engine and by the coordination layer
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Requested page not found
    #[error("Requested page not found")]
    PageNotFound,
    /// Database file is corrupted
    #[error("Database file is corrupted")]
    Corrupted,
    /// Update of meta page failed or environment had fatal error
    #[error("Update of meta page failed or environment had fatal error")]
    Panic,
    /// Database version mismatch
    #[error("Database version mismatch")]
    VersionMismatch,
    /// File is not a valid LMDB file
    #[error("File is not a valid LMDB file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("Environment maxreaders limit reached")]
    ReadersFull,
    /// Thread-local storage keys full
    #[error("Thread-local storage keys full")]
    TlsFull,
    /// Transaction has too many dirty pages
    #[error("Transaction has too many dirty pages")]
    TxnFull,
    /// Too many open cursors
    #[error("Too many open cursors")]
    CursorFull,
    /// Page has not enough space
    #[error("Page has not enough space")]
    PageFull,
    /// Database contents grew beyond environment mapsize
    #[error("Database contents grew beyond environment mapsize")]
    MapResized,
    /// Operation and DB incompatible
    #[error("Operation and DB incompatible, or DB flags changed")]
    Incompatible,
    /// Invalid reuse of reader locktable slot
    #[error("Invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid
    #[error("Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("The specified DBI was changed unexpectedly")]
    BadDbi,
    /// Operating system error number returned by the engine
    #[error("{}", os_message(.0))]
    Os(c_int),
    /// Update attempted on an environment opened with RDONLY
    #[error("Cannot update: database has been opened read-only")]
    ReadOnly,
    /// The write coordinator is no longer accepting requests
    #[error("Write coordinator has terminated")]
    Terminated,
    /// Environment has been closed
    #[error("Environment is closed")]
    EnvClosed,
    /// Path or database name contains an interior nul byte
    #[error("Path or name contains an interior nul byte")]
    InvalidPath,
    /// Map size cannot grow any further
    #[error("Map size of {0} bytes cannot grow any further")]
    MapSizeOverflow(usize),
    /// Sentinel a transaction function may return to abandon itself
    #[error("Abort the transaction")]
    Aborted,
}

fn os_message(code: &c_int) -> String {
    io::Error::from_raw_os_error(*code).to_string()
}

impl Error {
    /// Whether this is the engine's capacity-exhausted error
    pub fn is_map_full(&self) -> bool {
        matches!(self, Error::MapFull)
    }
}

impl From<c_int> for Error {
    fn from(err: c_int) -> Error {
        match err {
            -30799 => Error::KeyExist,
            -30798 => Error::NotFound,
            -30797 => Error::PageNotFound,
            -30796 => Error::Corrupted,
            -30795 => Error::Panic,
            -30794 => Error::VersionMismatch,
            -30793 => Error::Invalid,
            -30792 => Error::MapFull,
            -30791 => Error::DbsFull,
            -30790 => Error::ReadersFull,
            -30789 => Error::TlsFull,
            -30788 => Error::TxnFull,
            -30787 => Error::CursorFull,
            -30786 => Error::PageFull,
            -30785 => Error::MapResized,
            -30784 => Error::Incompatible,
            -30783 => Error::BadRslot,
            -30782 => Error::BadTxn,
            -30781 => Error::BadValSize,
            -30780 => Error::BadDbi,
            err => Error::Os(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.raw_os_error() {
            Some(code) => Error::from(code),
            None => Error::Os(-1),
        }
    }
}

/// Helper trait for converting engine return codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from(self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(rc: c_int) -> Error {
        Error::from(rc)
    }

    #[test]
    fn maps_engine_codes() {
        assert_eq!(code(-30799), Error::KeyExist);
        assert_eq!(code(-30798), Error::NotFound);
        assert_eq!(code(-30792), Error::MapFull);
        assert_eq!(code(-30780), Error::BadDbi);
        assert!(code(-30792).is_map_full());
        assert!(!Error::NotFound.is_map_full());
    }

    #[test]
    fn unknown_codes_are_os_errors() {
        // ENOENT
        assert_eq!(code(2), Error::Os(2));
        assert!(!Error::Os(2).to_string().is_empty());
    }

    #[test]
    fn zero_is_success() {
        let ok: c_int = 0;
        let readers_full: c_int = -30790;
        assert_eq!(ok.into_result(), Ok(()));
        assert_eq!(readers_full.into_result(), Err(Error::ReadersFull));
    }
}
