use silo_pack::PackError;
use silo_store::StoreError;
use silo_types::ContentId;
use thiserror::Error;

/// Errors surfaced by the object database facade.
#[derive(Error, Debug)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(ContentId),

    #[error("no object matches prefix: {0}")]
    UnknownPrefix(String),

    #[error("ambiguous prefix: {0}")]
    AmbiguousPrefix(String),

    /// Packed objects cannot be removed one at a time; the archive format
    /// has no single-entry erasure. Rebuild the pack instead.
    #[error("object is packed, remove requires repack: {0}")]
    ObjectPacked(ContentId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OdbResult<T> = Result<T, OdbError>;
