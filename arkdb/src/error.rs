use thiserror::Error;

/// Errors surfaced by the storage and transaction core.
///
/// `CorruptHeader`, `CorruptRef`, and `StorageFull` also appear (as a no_std
/// subset) on [`arkdb_tree::Error`]; anything the array/B+-tree layer raises
/// while operating through a [`crate::slab::SlabAllocator`] is translated
/// into one of those three and then widened back into this enum at the
/// transaction boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A node's 8-byte header failed validation on decode.
    #[error("node header failed validation")]
    CorruptHeader,

    /// A ref did not resolve to a live node under the current snapshot.
    #[error("ref 0x{0:x} does not resolve to a live node")]
    CorruptRef(u64),

    /// The file's magic or format version doesn't match what this build
    /// understands.
    #[error("file format mismatch: found version {found}, expected {expected}")]
    FileFormatMismatch { found: u16, expected: u16 },

    /// The backing store has no room to satisfy an allocation and declined
    /// to grow further.
    #[error("backing store has no space left for a {requested}-byte allocation")]
    StorageFull { requested: usize },

    /// A timed attempt to acquire the writer mutex did not succeed.
    #[error("timed out waiting for the writer lock")]
    WriteConflict,

    /// A read snapshot tried to translate a ref after its reader slot was
    /// released — a programming error in the caller.
    #[error("operation attempted on a snapshot that has already ended")]
    SnapshotExpired,

    /// The lock file's fixed-size reader ring has no free slot.
    #[error("lock file reader ring is full")]
    TooManyReaders,

    /// A positional array or tree operation (`get`, `set`, `insert`,
    /// `erase`) was given an index outside the valid range.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// An underlying file or mapping operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// `create_table` named a table that already exists in this group.
    #[error("table {name:?} already exists")]
    TableAlreadyExists { name: String },

    /// `open_table`/`drop_table`/`save_table` named a table absent from
    /// this group.
    #[error("no such table {name:?}")]
    NoSuchTable { name: String },
}

impl From<arkdb_tree::Error> for Error {
    fn from(e: arkdb_tree::Error) -> Self {
        match e {
            arkdb_tree::Error::CorruptHeader => Error::CorruptHeader,
            arkdb_tree::Error::CorruptRef(r) => Error::CorruptRef(r),
            arkdb_tree::Error::IndexOutOfRange { index, len } => {
                Error::IndexOutOfRange { index, len }
            }
            arkdb_tree::Error::StorageFull => Error::StorageFull { requested: 0 },
            // `arkdb_tree::Error` is `#[non_exhaustive]`; any future variant
            // it adds is reported as corruption rather than failing to build.
            _ => Error::CorruptHeader,
        }
    }
}
