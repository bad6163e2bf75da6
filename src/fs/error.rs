//! Error type shared by every layer of the engine.
//!
//! Device failures are not represented here: a `BlockDevice` that cannot
//! complete a transfer panics, which stops the operation in progress.

use thiserror::Error;

use super::wal::TxnId;

#[derive(Debug, Error)]
pub enum FsError {
    /// Host I/O failure while opening or sizing an image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The free map has no run of clear bits large enough.
    #[error("no free sectors left on the device")]
    NoSpace,

    /// The transaction already ended or was never started.
    #[error("transaction {0} is not active")]
    InactiveTransaction(TxnId),

    /// A byte range that does not fit inside one sector.
    #[error("invalid range: sector {sector} offset {offset} length {length}")]
    InvalidRange {
        sector: u32,
        offset: usize,
        length: usize,
    },

    /// The sector does not hold a valid on-disk inode.
    #[error("sector {0} does not hold a valid inode")]
    CorruptInode(u32),

    #[error("file would exceed the maximum size of {0} bytes")]
    FileTooLarge(usize),

    #[error("device of {0} sectors is too small for this layout")]
    DeviceTooSmall(usize),

    /// Inconsistent on-disk structure found while mounting.
    #[error("invalid on-disk format: {0}")]
    Format(String),
}

pub type Result<T> = core::result::Result<T, FsError>;
