use silo_types::{ContentId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("fanout bucket {bucket:#04x} would underflow")]
    FanoutUnderflow { bucket: u8 },

    #[error("corrupt archive entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("archive entry at offset {offset} does not exist")]
    EntryNotExist { offset: u64 },

    #[error("archive {0} is not available")]
    ArchiveMissing(u32),

    #[error("corrupt object {id}: stored bytes do not hash to their id")]
    ObjectCorrupted { id: ContentId },

    #[error("object size {size} exceeds the configured maximum {max}")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("ambiguous abbreviation: {0:?}")]
    AmbiguousPrefix(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PackResult<T> = Result<T, PackError>;
