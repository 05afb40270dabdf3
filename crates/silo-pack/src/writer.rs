use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use silo_types::{ContentId, Tag};

use crate::archive::{encoded_entry_len, PackArchive, ARCHIVE_HEADER_LEN};
use crate::entry::IndexEntry;
use crate::error::PackResult;
use crate::index::PackIndex;
use crate::pack::{archive_path, PackOptions};

/// Batch builder for a brand-new pack.
///
/// Objects stream into archive files as they arrive; placements accumulate
/// in memory and become the sorted index in one pass at [`close`]. Until
/// `close` returns, the pack at `base` has archives but no index, so
/// nothing opens it by accident.
///
/// [`close`]: PackWriter::close
#[derive(Debug)]
pub struct PackWriter {
    base: PathBuf,
    opts: PackOptions,
    entries: HashMap<ContentId, (u32, i64)>,
    archives: Vec<PackArchive>,
}

/// What [`PackWriter::close`] produced.
#[derive(Debug)]
pub struct PackSummary {
    /// Index path of the finished pack.
    pub base: PathBuf,
    /// Distinct objects written.
    pub object_count: u64,
    /// Archive files created.
    pub archive_count: u32,
}

impl PackWriter {
    /// Start building a pack whose index will live at `base`.
    ///
    /// Fails if a pack already exists there; a writer never appends to a
    /// finished pack.
    pub fn new(base: impl Into<PathBuf>, opts: PackOptions) -> PackResult<Self> {
        let base = base.into();
        if base.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("pack already exists at {}", base.display()),
            )
            .into());
        }
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            base,
            opts,
            entries: HashMap::new(),
            archives: Vec::new(),
        })
    }

    /// Add one object, deduplicating against objects already written.
    pub fn store(&mut self, tag: Tag, payload: &[u8]) -> PackResult<(bool, ContentId)> {
        let id = ContentId::compute(tag, payload);
        if self.entries.contains_key(&id) {
            return Ok((false, id));
        }

        let need = encoded_entry_len(tag, payload.len() as u64);
        let slot = self.writable_archive(need)?;
        let offset = self.archives[slot].write_entry(tag, payload)?;
        self.entries.insert(id, (slot as u32, offset as i64));
        Ok((true, id))
    }

    /// Number of distinct objects written so far.
    pub fn object_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Write the index and finish the pack.
    pub fn close(self) -> PackResult<PackSummary> {
        let object_count = self.entries.len() as u64;
        let archive_count = self.archives.len() as u32;
        drop(self.archives);

        let index = PackIndex::open(&self.base)?;
        index.bulk_insert(self.entries.into_iter().map(|(id, (archive, offset))| {
            IndexEntry {
                archive,
                offset,
                id,
            }
        }))?;

        Ok(PackSummary {
            base: self.base,
            object_count,
            archive_count,
        })
    }

    /// The pack base this writer builds toward.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn writable_archive(&mut self, need: u64) -> PackResult<usize> {
        if let Some(last) = self.archives.last() {
            let size = last.size();
            if size <= ARCHIVE_HEADER_LEN || size + need <= self.opts.max_archive_size {
                return Ok(self.archives.len() - 1);
            }
        }
        let id = self.archives.len() as u32;
        self.archives.push(PackArchive::open(
            archive_path(&self.base, id),
            self.opts.max_object_size,
        )?);
        Ok(self.archives.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{discover_archives, Pack};
    use crate::error::PackError;

    fn small_options() -> PackOptions {
        PackOptions {
            max_archive_size: 128,
            max_object_size: 1024,
        }
    }

    #[test]
    fn build_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("built");

        let mut writer = PackWriter::new(&base, PackOptions::default()).unwrap();
        let (_, id1) = writer.store(Tag::File, b"first").unwrap();
        let (_, id2) = writer.store(Tag::Tree, b"second").unwrap();
        let summary = writer.close().unwrap();
        assert_eq!(summary.object_count, 2);
        assert_eq!(summary.archive_count, 1);

        let pack = Pack::open(&base, PackOptions::default()).unwrap();
        assert_eq!(pack.load(&id1).unwrap().unwrap().1, b"first");
        assert_eq!(pack.load(&id2).unwrap().unwrap().1, b"second");
        assert_eq!(pack.object_count(), 2);
    }

    #[test]
    fn refuses_existing_pack() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("taken");
        fs::write(&base, b"").unwrap();
        let err = PackWriter::new(&base, PackOptions::default()).unwrap_err();
        assert!(matches!(err, PackError::Io(e) if e.kind() == io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("a").join("b").join("pack");
        let writer = PackWriter::new(&base, PackOptions::default()).unwrap();
        writer.close().unwrap();
        assert!(base.exists());
    }

    #[test]
    fn dedups_repeated_objects() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            PackWriter::new(dir.path().join("pack"), PackOptions::default()).unwrap();
        let (first, id1) = writer.store(Tag::Part, b"same").unwrap();
        let (second, id2) = writer.store(Tag::Part, b"same").unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(id1, id2);
        assert_eq!(writer.close().unwrap().object_count, 1);
    }

    #[test]
    fn rollover_creates_numbered_archives() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pack");
        let mut writer = PackWriter::new(&base, small_options()).unwrap();
        let mut ids = Vec::new();
        for i in 0..12u8 {
            ids.push(writer.store(Tag::Part, &[i; 32]).unwrap().1);
        }
        let summary = writer.close().unwrap();
        assert!(summary.archive_count > 1);
        assert_eq!(
            discover_archives(&base).unwrap().len(),
            summary.archive_count as usize
        );

        let pack = Pack::open(&base, small_options()).unwrap();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(pack.load(id).unwrap().unwrap().1, vec![i as u8; 32]);
        }
    }

    #[test]
    fn closed_index_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pack");
        let mut writer = PackWriter::new(&base, PackOptions::default()).unwrap();
        for i in 0..50u8 {
            writer.store(Tag::Part, &[i, i.wrapping_mul(7)]).unwrap();
        }
        writer.close().unwrap();

        let pack = Pack::open(&base, PackOptions::default()).unwrap();
        let mut seen = Vec::new();
        pack.list(&mut |id| seen.push(id)).unwrap();
        assert_eq!(seen.len(), 50);
        for w in seen.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn empty_writer_produces_empty_pack() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("empty");
        let summary = PackWriter::new(&base, PackOptions::default())
            .unwrap()
            .close()
            .unwrap();
        assert_eq!(summary.object_count, 0);
        assert_eq!(summary.archive_count, 0);

        let pack = Pack::open(&base, PackOptions::default()).unwrap();
        assert_eq!(pack.object_count(), 0);
    }
}
