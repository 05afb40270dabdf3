use silo_types::{ContentId, TypeError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ContentId),

    /// Stored bytes do not hash back to the id used to address them, or the
    /// record is structurally unreadable.
    #[error("corrupt object {id}: {reason}")]
    Corrupt { id: ContentId, reason: String },

    /// A hex abbreviation matched more than one stored id.
    #[error("ambiguous abbreviation: {0:?}")]
    AmbiguousPrefix(String),

    /// Invalid id or abbreviation input.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
