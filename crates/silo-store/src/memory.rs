use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use silo_types::{ContentId, Tag};

use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectStore;

/// In-memory object store for tests and embedding.
///
/// Objects live in a `BTreeMap` behind a `RwLock`; the map's id ordering
/// makes abbreviation lookups a bounded range scan, the same shape the
/// pack index uses on disk.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ContentId, (Tag, Vec<u8>)>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// All stored ids, in ascending order.
    pub fn all_ids(&self) -> Vec<ContentId> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Remove every object.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn store(&self, tag: Tag, payload: &[u8]) -> StoreResult<(bool, ContentId)> {
        let id = ContentId::compute(tag, payload);
        let mut map = self.objects.write().expect("lock poisoned");
        if map.contains_key(&id) {
            return Ok((false, id));
        }
        map.insert(id, (tag, payload.to_vec()));
        Ok((true, id))
    }

    fn load(&self, id: &ContentId) -> StoreResult<Option<(Tag, Vec<u8>)>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn stat(&self, id: &ContentId) -> StoreResult<Option<u64>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).map(|(_, payload)| payload.len() as u64))
    }

    fn remove(&self, id: &ContentId) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    fn list(&self, visit: &mut dyn FnMut(ContentId)) -> StoreResult<()> {
        let map = self.objects.read().expect("lock poisoned");
        for id in map.keys() {
            visit(*id);
        }
        Ok(())
    }

    fn deabbreviate(&self, prefix: &str) -> StoreResult<Option<ContentId>> {
        let (min, max) = ContentId::prefix_range(prefix)?;
        let map = self.objects.read().expect("lock poisoned");
        let mut range = map.range((Bound::Included(min), Bound::Included(max)));
        let first = range.next().map(|(id, _)| *id);
        if first.is_some() && range.next().is_some() {
            return Err(StoreError::AmbiguousPrefix(prefix.to_string()));
        }
        Ok(first)
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}
