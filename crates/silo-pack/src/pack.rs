use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use silo_types::{ContentId, Tag};

use crate::archive::{encoded_entry_len, PackArchive, ARCHIVE_HEADER_LEN};
use crate::entry::IndexEntry;
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

/// Tuning knobs shared by [`Pack`] and [`PackWriter`](crate::PackWriter).
#[derive(Clone, Copy, Debug)]
pub struct PackOptions {
    /// Soft cap on one archive file; writes past it open a new archive.
    pub max_archive_size: u64,
    /// Hard cap on a single object payload.
    pub max_object_size: u64,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_archive_size: 256 * 1024 * 1024,
            max_object_size: 64 * 1024 * 1024,
        }
    }
}

/// Path of archive `id` belonging to the pack at `base`.
pub fn archive_path(base: &Path, id: u32) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{name}.{id:06}"))
}

/// Find the numbered archive files beside the index at `base`, sorted by
/// archive id.
pub fn discover_archives(base: &Path) -> PackResult<Vec<(u32, PathBuf)>> {
    let Some(dir) = base.parent() else {
        return Ok(Vec::new());
    };
    let Some(stem) = base.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(suffix) = name
            .strip_prefix(stem.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };
        if suffix.len() != 6 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // 6 decimal digits always fit in u32.
        let id: u32 = suffix.parse().expect("validated digits");
        found.push((id, entry.path()));
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}

/// One consolidated pack: a sorted index plus its archive files.
///
/// The index lives at `base`; archives at `base.000000`, `base.000001`, …
/// New objects append to the highest-numbered archive until the next
/// entry would push it past `max_archive_size`, at which point the pack
/// spills to a fresh archive file.
#[derive(Debug)]
pub struct Pack {
    base: PathBuf,
    opts: PackOptions,
    index: PackIndex,
    state: RwLock<PackState>,
}

#[derive(Debug)]
struct PackState {
    /// Sparse slot map: an unreadable archive is simply absent, so only
    /// lookups resolving to its id fail.
    archives: HashMap<u32, Arc<PackArchive>>,
    /// Next archive id to create; `next - 1` is the current write target.
    next: u32,
}

impl Pack {
    /// Open the pack whose index lives at `base`, discovering sibling
    /// archives.
    pub fn open(base: impl Into<PathBuf>, opts: PackOptions) -> PackResult<Self> {
        let base = base.into();
        let index = PackIndex::open(&base)?;

        let mut archives = HashMap::new();
        let mut next = 0;
        for (id, path) in discover_archives(&base)? {
            match PackArchive::open(&path, opts.max_object_size) {
                Ok(archive) => {
                    archives.insert(id, Arc::new(archive));
                }
                Err(e) => {
                    tracing::warn!(archive = id, error = %e, "skipping unreadable archive");
                }
            }
            next = next.max(id + 1);
        }

        Ok(Self {
            base,
            opts,
            index,
            state: RwLock::new(PackState { archives, next }),
        })
    }

    /// Store an object, returning whether it was newly written and its id.
    ///
    /// Presence is verified against the archive, not just the index: an
    /// index entry pointing at a truncated or missing archive record does
    /// not count as stored, and gets overwritten by the fresh write.
    ///
    /// The pack-state lock is held exclusively from the dedup check
    /// through the index update; concurrent stores serialize, so no two
    /// writers can select an archive against a stale size or append the
    /// same object twice.
    pub fn store(&self, tag: Tag, payload: &[u8]) -> PackResult<(bool, ContentId)> {
        let id = ContentId::compute(tag, payload);
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(entry) = self.index.get(&id)? {
            let live = state
                .archives
                .get(&entry.archive)
                .map(|a| a.stat_entry(entry.offset as u64).is_ok())
                .unwrap_or(false);
            if live {
                return Ok((false, id));
            }
        }

        let need = encoded_entry_len(tag, payload.len() as u64);
        let (archive_id, archive) = self.writable_archive(&mut state, need)?;
        let offset = archive.write_entry(tag, payload)?;
        self.index.put(&IndexEntry {
            archive: archive_id,
            offset: offset as i64,
            id,
        })?;
        Ok((true, id))
    }

    /// Load an object. The payload is re-hashed against `id` before being
    /// returned.
    pub fn load(&self, id: &ContentId) -> PackResult<Option<(Tag, Vec<u8>)>> {
        let entry = match self.index.get(id)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let archive = self
            .archive(entry.archive)
            .ok_or(PackError::ArchiveMissing(entry.archive))?;
        let (tag, payload) = archive.read_entry(entry.offset as u64)?;
        if ContentId::compute(tag, &payload) != *id {
            return Err(PackError::ObjectCorrupted { id: *id });
        }
        Ok(Some((tag, payload)))
    }

    /// Payload size of an object, without reading the payload.
    pub fn stat(&self, id: &ContentId) -> PackResult<Option<u64>> {
        let entry = match self.index.get(id)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let archive = self
            .archive(entry.archive)
            .ok_or(PackError::ArchiveMissing(entry.archive))?;
        Ok(Some(archive.stat_entry(entry.offset as u64)?))
    }

    /// Resolve a hex abbreviation against the index.
    pub fn deabbreviate(&self, prefix: &str) -> PackResult<Option<ContentId>> {
        self.index.deabbreviate(prefix)
    }

    /// Invoke `visit` with every packed id, in ascending order.
    pub fn list(&self, visit: &mut dyn FnMut(ContentId)) -> PackResult<()> {
        self.index.list(&mut |entry| visit(entry.id))
    }

    /// Check whether an object is indexed.
    pub fn contains(&self, id: &ContentId) -> PackResult<bool> {
        Ok(self.index.get(id)?.is_some())
    }

    /// Number of packed objects.
    pub fn object_count(&self) -> u64 {
        self.index.len()
    }

    /// The index path this pack was opened at.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Close the index and every open archive.
    pub fn close(self) {
        // Files close on drop; the consuming receiver makes the intent
        // explicit at call sites.
    }

    fn archive(&self, id: u32) -> Option<Arc<PackArchive>> {
        self.state
            .read()
            .expect("lock poisoned")
            .archives
            .get(&id)
            .cloned()
    }

    /// The archive new bytes should go to, rolling over when `need` more
    /// bytes would exceed the cap. An empty archive accepts any entry, so
    /// a single object larger than the cap still lands somewhere.
    ///
    /// The caller holds the pack-state write lock.
    fn writable_archive(
        &self,
        state: &mut PackState,
        need: u64,
    ) -> PackResult<(u32, Arc<PackArchive>)> {
        if state.next > 0 {
            let last = state.next - 1;
            if let Some(archive) = state.archives.get(&last) {
                let size = archive.size();
                if size <= ARCHIVE_HEADER_LEN || size + need <= self.opts.max_archive_size {
                    return Ok((last, Arc::clone(archive)));
                }
            }
        }
        let id = state.next;
        let archive = Arc::new(PackArchive::open(
            archive_path(&self.base, id),
            self.opts.max_object_size,
        )?);
        state.archives.insert(id, Arc::clone(&archive));
        state.next = id + 1;
        Ok((id, archive))
    }
}
