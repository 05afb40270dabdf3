use silo_types::{ContentId, Tag};

use crate::error::StoreResult;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. Content-addressing guarantees this:
///   the same `(tag, payload)` always produces the same id.
/// - `store` is idempotent: re-storing an existing object reports
///   `is_new = false` and leaves the stored bytes untouched.
/// - Every `load` verifies the returned bytes against the requested id;
///   corruption is surfaced, never silently returned.
/// - Concurrent reads are always safe (objects are immutable).
/// - All I/O errors are propagated, never silently ignored.
pub trait ObjectStore: Send + Sync {
    /// Store an object, returning whether it was newly written and its id.
    fn store(&self, tag: Tag, payload: &[u8]) -> StoreResult<(bool, ContentId)>;

    /// Load an object by id.
    ///
    /// Returns `Ok(None)` if the object does not exist. Returns `Err` on
    /// I/O failure or if the stored bytes do not hash back to `id`.
    fn load(&self, id: &ContentId) -> StoreResult<Option<(Tag, Vec<u8>)>>;

    /// Payload size of an object, without reading the payload.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn stat(&self, id: &ContentId) -> StoreResult<Option<u64>>;

    /// Delete an object. Returns `true` if it existed.
    fn remove(&self, id: &ContentId) -> StoreResult<bool>;

    /// Invoke `visit` with the id of every stored object.
    ///
    /// Enumeration order is unspecified. Entries that cannot be decoded
    /// back to an id are skipped, not reported as errors.
    fn list(&self, visit: &mut dyn FnMut(ContentId)) -> StoreResult<()>;

    /// Resolve a hex abbreviation to the single id it identifies.
    ///
    /// Returns `Ok(None)` when no stored id matches and
    /// [`StoreError::AmbiguousPrefix`](crate::StoreError::AmbiguousPrefix)
    /// when more than one does.
    fn deabbreviate(&self, prefix: &str) -> StoreResult<Option<ContentId>>;

    /// Check whether an object exists in the store.
    fn contains(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.stat(id)?.is_some())
    }
}
