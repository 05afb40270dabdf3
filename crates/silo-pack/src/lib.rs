//! Pack storage: consolidated archives plus a sorted lookup index.
//!
//! A pack holds many objects in a few large files, the counterpart to the
//! one-file-per-object loose store. It has two on-disk pieces:
//!
//! - **Index** (`base`): a 256-way fanout table followed by a flat array
//!   of 32-byte entries sorted by content id, giving O(log n) lookups.
//! - **Archives** (`base.000000`, `base.000001`, …): append-only logs of
//!   tagged, varint-framed object payloads. A full archive rolls over to
//!   the next number; existing bytes are never rewritten.
//!
//! [`Pack`] couples the two for read/write access to a live pack.
//! [`PackWriter`] batch-builds a brand-new pack and writes its index in
//! one sorted pass at the end.

pub mod archive;
pub mod entry;
pub mod error;
pub mod index;
pub mod pack;
mod table;
pub mod writer;

pub use archive::{PackArchive, ARCHIVE_MAGIC};
pub use entry::{IndexEntry, INDEX_ENTRY_LEN};
pub use error::{PackError, PackResult};
pub use index::{PackIndex, INDEX_MAGIC};
pub use pack::{archive_path, discover_archives, Pack, PackOptions};
pub use writer::{PackSummary, PackWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use silo_types::{ContentId, Tag};

    #[test]
    fn writer_output_serves_reads() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pack");

        let mut writer = PackWriter::new(&base, PackOptions::default()).unwrap();
        let ids: Vec<ContentId> = (0..20u8)
            .map(|i| {
                writer
                    .store(Tag::File, format!("object {i}").as_bytes())
                    .unwrap()
                    .1
            })
            .collect();
        writer.close().unwrap();

        let pack = Pack::open(&base, PackOptions::default()).unwrap();
        assert_eq!(pack.object_count(), 20);
        for (i, id) in ids.iter().enumerate() {
            let (tag, payload) = pack.load(id).unwrap().unwrap();
            assert_eq!(tag, Tag::File);
            assert_eq!(payload, format!("object {i}").into_bytes());
        }
    }

    #[test]
    fn pack_grows_after_writer_close() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pack");

        let mut writer = PackWriter::new(&base, PackOptions::default()).unwrap();
        let (_, old_id) = writer.store(Tag::Part, b"from writer").unwrap();
        writer.close().unwrap();

        let pack = Pack::open(&base, PackOptions::default()).unwrap();
        let (_, new_id) = pack.store(Tag::Part, b"added later").unwrap();
        assert!(pack.contains(&old_id).unwrap());
        assert!(pack.contains(&new_id).unwrap());
        assert_eq!(pack.object_count(), 2);
    }

    #[test]
    fn identical_payload_different_tags_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let pack = Pack::open(dir.path().join("pack"), PackOptions::default()).unwrap();

        let (_, file_id) = pack.store(Tag::File, b"shared bytes").unwrap();
        let (_, tree_id) = pack.store(Tag::Tree, b"shared bytes").unwrap();
        assert_ne!(file_id, tree_id);
        assert_eq!(pack.load(&file_id).unwrap().unwrap().0, Tag::File);
        assert_eq!(pack.load(&tree_id).unwrap().unwrap().0, Tag::Tree);
    }
}
