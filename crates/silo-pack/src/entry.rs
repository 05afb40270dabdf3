use silo_types::{ContentId, ID_LEN};

/// Encoded width of one index entry.
pub const INDEX_ENTRY_LEN: usize = 4 + 8 + ID_LEN;

/// One record of the pack index: where an object's bytes live.
///
/// Wire layout (little-endian): `archive_id[u32] ∥ file_offset[i64] ∥
/// content_id[20]`, 32 bytes total. Entries are stored in a flat array
/// sorted ascending by `id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Which archive file holds the object.
    pub archive: u32,
    /// Byte offset of the entry inside that archive.
    pub offset: i64,
    /// The object's content id, the array's sort key.
    pub id: ContentId,
}

impl IndexEntry {
    /// Serialize to the fixed 32-byte wire form.
    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[..4].copy_from_slice(&self.archive.to_le_bytes());
        buf[4..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..].copy_from_slice(self.id.as_bytes());
        buf
    }

    /// Deserialize from the fixed 32-byte wire form.
    pub fn decode(buf: &[u8; INDEX_ENTRY_LEN]) -> Self {
        let archive = u32::from_le_bytes(buf[..4].try_into().expect("slice width"));
        let offset = i64::from_le_bytes(buf[4..12].try_into().expect("slice width"));
        let mut raw = [0u8; ID_LEN];
        raw.copy_from_slice(&buf[12..]);
        Self {
            archive,
            offset,
            id: ContentId::from_raw(raw),
        }
    }
}
