use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::RwLock;

use silo_types::ContentId;

use crate::entry::{IndexEntry, INDEX_ENTRY_LEN};
use crate::error::{PackError, PackResult};
use crate::table::{self, EntryTable, InsertOutcome};

/// Magic bytes opening every index file.
pub const INDEX_MAGIC: &[u8; 4] = b"INDX";

const FANOUT_BUCKETS: usize = 256;

/// Header width: magic plus the fanout table.
pub const INDEX_HEADER_LEN: u64 = 4 + FANOUT_BUCKETS as u64 * 8;

/// The on-disk sorted index of a pack.
///
/// Layout: `magic[4] ∥ fanout[256 × u64 LE] ∥ entry[*]`, entries sorted
/// ascending by content id. `fanout[b]` counts the entries whose first id
/// byte is `≤ b`, so `fanout[b-1]..fanout[b]` brackets bucket `b` and a
/// point lookup binary-searches only that sub-range.
///
/// Invariants, preserved by every mutation:
/// - the entry array is fully sorted by id;
/// - the fanout table is monotonic non-decreasing with
///   `fanout[255] == len`.
///
/// A `RwLock` serializes writers against readers; readers share.
#[derive(Debug)]
pub struct PackIndex {
    inner: RwLock<IndexState>,
}

#[derive(Debug)]
struct IndexFile {
    file: File,
    len: u64,
}

impl IndexFile {
    fn entry_offset(i: u64) -> u64 {
        INDEX_HEADER_LEN + i * INDEX_ENTRY_LEN as u64
    }
}

impl EntryTable for IndexFile {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, i: u64) -> PackResult<IndexEntry> {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        self.file.read_exact_at(&mut buf, Self::entry_offset(i))?;
        Ok(IndexEntry::decode(&buf))
    }

    fn write(&mut self, i: u64, entry: &IndexEntry) -> PackResult<()> {
        self.file.write_all_at(&entry.encode(), Self::entry_offset(i))?;
        Ok(())
    }

    fn append(&mut self, entry: &IndexEntry) -> PackResult<()> {
        self.file
            .write_all_at(&entry.encode(), Self::entry_offset(self.len))?;
        self.len += 1;
        Ok(())
    }

    fn truncate_last(&mut self) -> PackResult<()> {
        debug_assert!(self.len > 0);
        self.len -= 1;
        self.file.set_len(Self::entry_offset(self.len))?;
        Ok(())
    }
}

#[derive(Debug)]
struct IndexState {
    table: IndexFile,
    fanout: [u64; FANOUT_BUCKETS],
}

impl IndexState {
    /// Entry range `[lo, hi)` covered by first-byte bucket `b`.
    fn bucket_bounds(&self, b: u8) -> (u64, u64) {
        let lo = if b == 0 {
            0
        } else {
            self.fanout[b as usize - 1]
        };
        (lo, self.fanout[b as usize])
    }

    fn bump_fanout(&mut self, first_byte: u8) {
        for bucket in first_byte as usize..FANOUT_BUCKETS {
            self.fanout[bucket] += 1;
        }
    }

    fn drop_fanout(&mut self, first_byte: u8) -> PackResult<()> {
        for bucket in first_byte as usize..FANOUT_BUCKETS {
            if self.fanout[bucket] == 0 {
                return Err(PackError::FanoutUnderflow {
                    bucket: bucket as u8,
                });
            }
        }
        for bucket in first_byte as usize..FANOUT_BUCKETS {
            self.fanout[bucket] -= 1;
        }
        Ok(())
    }

    fn write_fanout(&self) -> PackResult<()> {
        let mut buf = [0u8; FANOUT_BUCKETS * 8];
        for (i, count) in self.fanout.iter().enumerate() {
            buf[i * 8..(i + 1) * 8].copy_from_slice(&count.to_le_bytes());
        }
        self.table.file.write_all_at(&buf, 4)?;
        Ok(())
    }
}

impl PackIndex {
    /// Open an index file, creating an empty one if absent.
    ///
    /// An existing file must carry the `INDX` magic, a monotonic fanout
    /// table that agrees with the entry count, and a whole number of
    /// entries; anything else is rejected as malformed.
    pub fn open(path: impl AsRef<Path>) -> PackResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        if file_len == 0 {
            let mut header = vec![0u8; INDEX_HEADER_LEN as usize];
            header[..4].copy_from_slice(INDEX_MAGIC);
            file.write_all_at(&header, 0)?;
            return Ok(Self {
                inner: RwLock::new(IndexState {
                    table: IndexFile { file, len: 0 },
                    fanout: [0; FANOUT_BUCKETS],
                }),
            });
        }

        if file_len < INDEX_HEADER_LEN {
            return Err(PackError::IndexCorrupted("header truncated".into()));
        }
        let mut magic = [0u8; 4];
        file.read_exact_at(&mut magic, 0)?;
        if &magic != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }

        let mut buf = [0u8; FANOUT_BUCKETS * 8];
        file.read_exact_at(&mut buf, 4)?;
        let mut fanout = [0u64; FANOUT_BUCKETS];
        for (i, count) in fanout.iter_mut().enumerate() {
            *count = u64::from_le_bytes(buf[i * 8..(i + 1) * 8].try_into().expect("slice width"));
        }
        if fanout.windows(2).any(|w| w[0] > w[1]) {
            return Err(PackError::IndexCorrupted("fanout not monotonic".into()));
        }

        let body = file_len - INDEX_HEADER_LEN;
        if body % INDEX_ENTRY_LEN as u64 != 0 {
            return Err(PackError::IndexCorrupted(
                "entry region is not a whole number of entries".into(),
            ));
        }
        let len = body / INDEX_ENTRY_LEN as u64;
        if fanout[FANOUT_BUCKETS - 1] != len {
            return Err(PackError::IndexCorrupted(format!(
                "fanout counts {} entries, file holds {}",
                fanout[FANOUT_BUCKETS - 1],
                len
            )));
        }

        Ok(Self {
            inner: RwLock::new(IndexState {
                table: IndexFile { file, len },
                fanout,
            }),
        })
    }

    /// Look up the entry for `id`.
    pub fn get(&self, id: &ContentId) -> PackResult<Option<IndexEntry>> {
        let state = self.inner.read().expect("lock poisoned");
        let (lo, hi) = state.bucket_bounds(id.first_byte());
        if lo == hi {
            return Ok(None);
        }
        match table::find(&state.table, lo, hi, id)? {
            Some(at) => Ok(Some(state.table.read(at)?)),
            None => Ok(None),
        }
    }

    /// Insert an entry, keeping the array sorted and the fanout current.
    ///
    /// An entry with the same id overwrites the existing record in place
    /// (the fanout is unchanged in that case).
    pub fn put(&self, entry: &IndexEntry) -> PackResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        let outcome = table::insert(&mut state.table, entry)?;
        if outcome != InsertOutcome::Replaced {
            state.bump_fanout(entry.id.first_byte());
            state.write_fanout()?;
        }
        Ok(())
    }

    /// Delete the entry for `id`. Returns `true` if it existed.
    pub fn delete(&self, id: &ContentId) -> PackResult<bool> {
        let mut state = self.inner.write().expect("lock poisoned");
        let len = state.table.len();
        let at = match table::find(&state.table, 0, len, id)? {
            Some(at) => at,
            None => return Ok(false),
        };
        state.drop_fanout(id.first_byte())?;
        state.write_fanout()?;
        table::remove_at(&mut state.table, at)?;
        Ok(true)
    }

    /// Resolve a hex abbreviation to the single id it identifies.
    ///
    /// The prefix is padded to a `[min, max]` id range; the fanout narrows
    /// the candidate buckets, a binary search finds the range start, and a
    /// linear scan over the tranche counts matches. More than one match is
    /// ambiguous.
    pub fn deabbreviate(&self, prefix: &str) -> PackResult<Option<ContentId>> {
        let (min, max) = ContentId::prefix_range(prefix)?;
        let state = self.inner.read().expect("lock poisoned");

        let start = if min.first_byte() == 0 {
            0
        } else {
            state.fanout[min.first_byte() as usize - 1]
        };
        let end = state.fanout[max.first_byte() as usize];

        let mut at = table::lower_bound(&state.table, start, end, &min)?;
        let mut found = None;
        while at < end {
            let entry = state.table.read(at)?;
            if entry.id > max {
                break;
            }
            if found.is_some() {
                return Err(PackError::AmbiguousPrefix(prefix.to_string()));
            }
            found = Some(entry.id);
            at += 1;
        }
        Ok(found)
    }

    /// Invoke `visit` with every entry, in ascending id order.
    pub fn list(&self, visit: &mut dyn FnMut(&IndexEntry)) -> PackResult<()> {
        let state = self.inner.read().expect("lock poisoned");
        for i in 0..state.table.len() {
            visit(&state.table.read(i)?);
        }
        Ok(())
    }

    /// Number of indexed entries.
    pub fn len(&self) -> u64 {
        self.inner.read().expect("lock poisoned").table.len()
    }

    /// Returns `true` if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the fanout table.
    pub fn fanout(&self) -> [u64; 256] {
        self.inner.read().expect("lock poisoned").fanout
    }

    /// Append a batch of entries in arbitrary order, then sort once.
    ///
    /// Used when building a brand-new pack: appending plus a single
    /// swap-based sort pass costs O(n log n) in total, where per-entry
    /// [`put`](Self::put) bubbling would cost O(n) each.
    pub fn bulk_insert(
        &self,
        entries: impl IntoIterator<Item = IndexEntry>,
    ) -> PackResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        for entry in entries {
            state.table.append(&entry)?;
            state.bump_fanout(entry.id.first_byte());
        }
        table::sort(&mut state.table)?;
        state.write_fanout()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_types::{Tag, ID_LEN};

    fn temp_index() -> (tempfile::TempDir, PackIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = PackIndex::open(dir.path().join("index")).unwrap();
        (dir, index)
    }

    fn entry_with_first_byte(b: u8, salt: u8) -> IndexEntry {
        let mut raw = [salt; ID_LEN];
        raw[0] = b;
        IndexEntry {
            archive: 0,
            offset: (b as i64) << 8 | salt as i64,
            id: ContentId::from_raw(raw),
        }
    }

    /// Check the two index invariants: sortedness and fanout agreement.
    fn assert_invariants(index: &PackIndex) {
        let mut ids = Vec::new();
        index.list(&mut |e| ids.push(e.id)).unwrap();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "index not sorted");
        }
        let fanout = index.fanout();
        for b in 0..=255u8 {
            let expected = ids.iter().filter(|id| id.first_byte() <= b).count() as u64;
            assert_eq!(fanout[b as usize], expected, "fanout bucket {b:#04x}");
        }
    }

    #[test]
    fn open_creates_empty_index() {
        let (_dir, index) = temp_index();
        assert!(index.is_empty());
        assert_eq!(index.fanout(), [0u64; 256]);
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, index) = temp_index();
        let entry = entry_with_first_byte(0x42, 1);
        index.put(&entry).unwrap();
        assert_eq!(index.get(&entry.id).unwrap(), Some(entry));
        assert!(index
            .get(&entry_with_first_byte(0x43, 1).id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn put_same_id_overwrites() {
        let (_dir, index) = temp_index();
        let entry = entry_with_first_byte(0x10, 1);
        index.put(&entry).unwrap();

        let replacement = IndexEntry {
            archive: 3,
            offset: 777,
            ..entry
        };
        index.put(&replacement).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&entry.id).unwrap(), Some(replacement));
        assert_invariants(&index);
    }

    #[test]
    fn puts_maintain_invariants() {
        let (_dir, index) = temp_index();
        for (i, b) in [0x80u8, 0x01, 0xff, 0x40, 0x80, 0x00, 0x7f].iter().enumerate() {
            index.put(&entry_with_first_byte(*b, i as u8)).unwrap();
            assert_invariants(&index);
        }
        assert_eq!(index.len(), 7);
    }

    #[test]
    fn delete_maintains_invariants() {
        let (_dir, index) = temp_index();
        let entries: Vec<IndexEntry> = (0..10u8)
            .map(|i| entry_with_first_byte(i.wrapping_mul(29), i))
            .collect();
        for e in &entries {
            index.put(e).unwrap();
        }
        for e in &entries {
            assert!(index.delete(&e.id).unwrap());
            assert_invariants(&index);
            assert!(index.get(&e.id).unwrap().is_none());
        }
        assert!(index.is_empty());
    }

    #[test]
    fn delete_absent_returns_false() {
        let (_dir, index) = temp_index();
        index.put(&entry_with_first_byte(5, 1)).unwrap();
        assert!(!index.delete(&entry_with_first_byte(6, 1).id).unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let entries: Vec<IndexEntry> =
            (0..5u8).map(|i| entry_with_first_byte(i * 50, i)).collect();
        {
            let index = PackIndex::open(&path).unwrap();
            for e in &entries {
                index.put(e).unwrap();
            }
        }
        let index = PackIndex::open(&path).unwrap();
        assert_eq!(index.len(), 5);
        for e in &entries {
            assert_eq!(index.get(&e.id).unwrap(), Some(*e));
        }
        assert_invariants(&index);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut junk = vec![0u8; INDEX_HEADER_LEN as usize];
        junk[..4].copy_from_slice(b"JUNK");
        std::fs::write(&path, junk).unwrap();
        assert!(matches!(
            PackIndex::open(&path).unwrap_err(),
            PackError::InvalidMagic { .. }
        ));
    }

    #[test]
    fn open_rejects_truncated_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        std::fs::write(&path, b"INDX\x00\x00").unwrap();
        assert!(matches!(
            PackIndex::open(&path).unwrap_err(),
            PackError::IndexCorrupted(_)
        ));
    }

    #[test]
    fn open_rejects_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let index = PackIndex::open(&path).unwrap();
            index.put(&entry_with_first_byte(1, 1)).unwrap();
        }
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(INDEX_HEADER_LEN + INDEX_ENTRY_LEN as u64 - 3)
            .unwrap();
        drop(file);
        assert!(matches!(
            PackIndex::open(&path).unwrap_err(),
            PackError::IndexCorrupted(_)
        ));
    }

    #[test]
    fn open_rejects_fanout_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        {
            let index = PackIndex::open(&path).unwrap();
            index.put(&entry_with_first_byte(9, 1)).unwrap();
        }
        // Truncate away the entry but leave the fanout claiming one.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(INDEX_HEADER_LEN).unwrap();
        drop(file);
        assert!(matches!(
            PackIndex::open(&path).unwrap_err(),
            PackError::IndexCorrupted(_)
        ));
    }

    #[test]
    fn deabbreviate_unique() {
        let (_dir, index) = temp_index();
        let entry = entry_with_first_byte(0xab, 7);
        index.put(&entry).unwrap();
        index.put(&entry_with_first_byte(0x12, 7)).unwrap();

        let hex = entry.id.to_hex();
        assert_eq!(index.deabbreviate(&hex[..1]).unwrap(), Some(entry.id));
        assert_eq!(index.deabbreviate(&hex[..5]).unwrap(), Some(entry.id));
        assert_eq!(index.deabbreviate(&hex).unwrap(), Some(entry.id));
    }

    #[test]
    fn deabbreviate_none() {
        let (_dir, index) = temp_index();
        index.put(&entry_with_first_byte(0x12, 7)).unwrap();
        assert!(index.deabbreviate("ff").unwrap().is_none());
    }

    #[test]
    fn deabbreviate_ambiguous() {
        let (_dir, index) = temp_index();
        index.put(&entry_with_first_byte(0xa1, 1)).unwrap();
        index.put(&entry_with_first_byte(0xa2, 2)).unwrap();
        assert!(matches!(
            index.deabbreviate("a").unwrap_err(),
            PackError::AmbiguousPrefix(_)
        ));
        // Two hex chars pins down one of them.
        let id = index.deabbreviate("a1").unwrap().unwrap();
        assert_eq!(id.first_byte(), 0xa1);
    }

    #[test]
    fn deabbreviate_nibble_spanning_buckets() {
        // A one-nibble prefix covers 16 first-byte buckets.
        let (_dir, index) = temp_index();
        index.put(&entry_with_first_byte(0x3f, 1)).unwrap();
        let resolved = index.deabbreviate("3").unwrap().unwrap();
        assert_eq!(resolved.first_byte(), 0x3f);
    }

    #[test]
    fn bulk_insert_sorts_and_counts() {
        let (_dir, index) = temp_index();
        let entries: Vec<IndexEntry> = [0xf0u8, 0x03, 0x77, 0x10, 0xcc]
            .iter()
            .enumerate()
            .map(|(i, b)| entry_with_first_byte(*b, i as u8))
            .collect();
        index.bulk_insert(entries.iter().copied()).unwrap();
        assert_eq!(index.len(), 5);
        assert_invariants(&index);
        for e in &entries {
            assert_eq!(index.get(&e.id).unwrap(), Some(*e));
        }
    }

    #[test]
    fn tag_computed_ids_work_end_to_end() {
        let (_dir, index) = temp_index();
        let ids: Vec<ContentId> = (0..20u8)
            .map(|i| ContentId::compute(Tag::Part, &[i]))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            index
                .put(&IndexEntry {
                    archive: 0,
                    offset: i as i64,
                    id: *id,
                })
                .unwrap();
        }
        assert_invariants(&index);
        for id in &ids {
            assert!(index.get(id).unwrap().is_some());
        }
    }
}
