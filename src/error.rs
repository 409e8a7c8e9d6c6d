//! Crate-wide error type.
//!
//! Every fallible operation in the storage core returns [`Result`]. The
//! variants map one-to-one onto the failure classes a command dispatcher has
//! to distinguish: wrong-type answers, absent keys, numeric/range problems,
//! I/O failures, snapshot-format corruption, and busy/out-of-memory states.
//! Malformed client input is always reported through these variants, never by
//! panicking.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Operation applied against a key holding a value of the wrong type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Key or member absent where the operation requires it to exist.
    #[error("no such key")]
    NotFound,

    /// Numeric parse failure, overflow, negative count, or index out of
    /// bounds. The payload names the offending quantity.
    #[error("value is out of range: {0}")]
    OutOfRange(&'static str),

    /// Argument is not a valid integer.
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// Argument is not a valid float.
    #[error("value is not a valid float")]
    NotFloat,

    /// Underlying read/write/sync failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot stream is structurally invalid: bad magic, unsupported
    /// version, unknown opcode or length form, checksum mismatch, truncated
    /// payload. The in-memory state is undefined after a load reports this.
    #[error("snapshot format error: {0}")]
    Corrupt(String),

    /// A conflicting background operation is already running.
    #[error("busy: {0}")]
    Busy(&'static str),

    /// The allocator reported failure.
    #[error("out of memory")]
    Oom,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::Corrupt`] from a format message.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Error {
        Error::Corrupt(msg.into())
    }
}
