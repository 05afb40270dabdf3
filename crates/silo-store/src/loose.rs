use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use silo_types::{ContentId, Tag, ID_HEX_LEN, TAG_LEN};
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};
use crate::traits::ObjectStore;

/// Filesystem store holding each object as its own file.
///
/// This is the destination for every newly created object; a pack later
/// consolidates them. The on-disk record is `tag[4] ∥ payload`, stored at
/// `<root>/<hex id[0]>/<hex id[1]>/<hex id[2..]>` so no single directory
/// accumulates unbounded entries.
///
/// Writes are atomic: the record lands in a temp file inside the store
/// root and is renamed onto its shard path. Two writers racing on the same
/// id rename byte-identical files, so the last rename wins harmlessly.
pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    /// Open a loose store rooted at `root`, creating the directory if absent.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.root
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(&hex[4..])
    }

    /// Reconstruct an id from the three shard path segments.
    fn decode_segments(d1: &str, d2: &str, file: &str) -> Option<ContentId> {
        if d1.len() != 2 || d2.len() != 2 || file.len() != ID_HEX_LEN - 4 {
            return None;
        }
        let mut hex = String::with_capacity(ID_HEX_LEN);
        hex.push_str(d1);
        hex.push_str(d2);
        hex.push_str(file);
        ContentId::from_hex(&hex).ok()
    }

    /// Does a shard path segment agree with `prefix` starting at `offset`?
    ///
    /// Only the overlapping characters are compared, so a one-nibble
    /// abbreviation still narrows the first-level directory scan.
    fn segment_matches(prefix: &str, offset: usize, segment: &str) -> bool {
        let prefix = prefix.as_bytes();
        for (i, &b) in segment.as_bytes().iter().enumerate() {
            match prefix.get(offset + i) {
                Some(&p) if p != b => return false,
                Some(_) => {}
                None => return true,
            }
        }
        true
    }

    fn hex_dir_name(entry: &fs::DirEntry) -> Option<String> {
        if !entry.file_type().ok()?.is_dir() {
            return None;
        }
        let name = entry.file_name().into_string().ok()?;
        if name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(name)
        } else {
            None
        }
    }
}

impl ObjectStore for LooseStore {
    fn store(&self, tag: Tag, payload: &[u8]) -> StoreResult<(bool, ContentId)> {
        let id = ContentId::compute(tag, payload);
        let path = self.object_path(&id);

        // Idempotent fast path: a file of exactly the expected size is
        // taken to be the object already stored. Content is not re-verified
        // here; the load-side hash check is the corruption firewall.
        let expected = (payload.len() + TAG_LEN) as u64;
        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() == expected {
                return Ok((false, id));
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&tag.as_bytes())?;
        tmp.write_all(payload)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok((true, id))
    }

    fn load(&self, id: &ContentId) -> StoreResult<Option<(Tag, Vec<u8>)>> {
        let buf = match fs::read(self.object_path(id)) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if buf.len() < TAG_LEN {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("record shorter than tag: {} bytes", buf.len()),
            });
        }
        let mut raw = [0u8; TAG_LEN];
        raw.copy_from_slice(&buf[..TAG_LEN]);
        let tag = Tag::from_bytes(raw);
        let payload = buf[TAG_LEN..].to_vec();

        // Every read re-derives the id; a mismatch means the bytes on disk
        // are not the object this id names.
        if ContentId::compute(tag, &payload) != *id {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: "content hash mismatch".to_string(),
            });
        }
        Ok(Some((tag, payload)))
    }

    fn stat(&self, id: &ContentId) -> StoreResult<Option<u64>> {
        let meta = match fs::metadata(self.object_path(id)) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.len() < TAG_LEN as u64 {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("record shorter than tag: {} bytes", meta.len()),
            });
        }
        Ok(Some(meta.len() - TAG_LEN as u64))
    }

    fn remove(&self, id: &ContentId) -> StoreResult<bool> {
        let path = self.object_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        // Prune now-empty shard directories, innermost first. Failure just
        // means the directory still holds other objects.
        if let Some(shard) = path.parent() {
            let _ = fs::remove_dir(shard);
            if let Some(outer) = shard.parent() {
                let _ = fs::remove_dir(outer);
            }
        }
        Ok(true)
    }

    fn list(&self, visit: &mut dyn FnMut(ContentId)) -> StoreResult<()> {
        let walk = walkdir::WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3);
        for entry in walk.into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Vec<&str> = rel
                .iter()
                .filter_map(|c| c.to_str())
                .collect();
            let [d1, d2, file] = parts.as_slice() else {
                continue;
            };
            // Stray files that do not decode to exactly 20 bytes are
            // tolerated and skipped.
            if let Some(id) = Self::decode_segments(d1, d2, file) {
                visit(id);
            }
        }
        Ok(())
    }

    fn deabbreviate(&self, prefix: &str) -> StoreResult<Option<ContentId>> {
        // Validates length and hex digits.
        ContentId::prefix_range(prefix)?;
        let prefix = prefix.to_ascii_lowercase();

        let mut found: Option<ContentId> = None;
        for d1 in fs::read_dir(&self.root)? {
            let Some(d1_name) = Self::hex_dir_name(&d1?) else {
                continue;
            };
            if !Self::segment_matches(&prefix, 0, &d1_name) {
                continue;
            }
            for d2 in fs::read_dir(self.root.join(&d1_name))? {
                let Some(d2_name) = Self::hex_dir_name(&d2?) else {
                    continue;
                };
                if !Self::segment_matches(&prefix, 2, &d2_name) {
                    continue;
                }
                let shard = self.root.join(&d1_name).join(&d2_name);
                for file in fs::read_dir(shard)? {
                    let Ok(file_name) = file?.file_name().into_string() else {
                        continue;
                    };
                    let Some(id) = Self::decode_segments(&d1_name, &d2_name, &file_name)
                    else {
                        continue;
                    };
                    if !id.to_hex().starts_with(&prefix) {
                        continue;
                    }
                    if found.is_some() {
                        return Err(StoreError::AmbiguousPrefix(prefix));
                    }
                    found = Some(id);
                }
            }
        }
        Ok(found)
    }
}
