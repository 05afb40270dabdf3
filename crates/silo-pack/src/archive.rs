use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::RwLock;

use silo_types::{Tag, TAG_LEN};

use crate::error::{PackError, PackResult};

/// Magic bytes opening every archive file.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"PACK";

/// Header width: just the magic.
pub const ARCHIVE_HEADER_LEN: u64 = 4;

/// Entry flag: the entry logically exists. A clear bit marks a tombstone.
const FLAG_EXISTS: u8 = 0x01;
/// Entry flag: a varint length and payload follow.
const FLAG_DATA: u8 = 0x02;
/// Entry flag: a literal 4-byte tag follows (the tag is not well-known).
const FLAG_TAG_OTHER: u8 = 0x04;

/// Well-known tag code, stored in flag bits 4–5 when the escape is unset.
const TAG_CODE_SHIFT: u8 = 4;
const TAG_CODE_MASK: u8 = 0b11;

fn tag_flag_bits(tag: Tag) -> (u8, Option<[u8; TAG_LEN]>) {
    match tag {
        Tag::File => (0 << TAG_CODE_SHIFT, None),
        Tag::Part => (1 << TAG_CODE_SHIFT, None),
        Tag::Tree => (2 << TAG_CODE_SHIFT, None),
        Tag::Edit => (3 << TAG_CODE_SHIFT, None),
        Tag::Other(raw) => (FLAG_TAG_OTHER, Some(raw)),
    }
}

fn known_tag(flags: u8) -> Tag {
    match (flags >> TAG_CODE_SHIFT) & TAG_CODE_MASK {
        0 => Tag::File,
        1 => Tag::Part,
        2 => Tag::Tree,
        _ => Tag::Edit,
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes consumed).
///
/// `offset` is the archive position of the varint, used for error context.
pub(crate) fn decode_varint(data: &[u8], offset: u64) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(PackError::CorruptEntry {
        offset,
        reason: "truncated varint".into(),
    })
}

/// Encoded width of an archive entry for `(tag, payload)`.
pub(crate) fn encoded_entry_len(tag: Tag, payload_len: u64) -> u64 {
    let mut len = 1;
    if !tag.is_known() {
        len += TAG_LEN as u64;
    }
    if payload_len > 0 {
        let mut scratch = Vec::with_capacity(10);
        encode_varint(&mut scratch, payload_len);
        len += scratch.len() as u64 + payload_len;
    }
    len
}

/// One append-only log file of object payloads.
///
/// Entries are `flags[u8] ∥ (tag[4] if escape) ∥ (varint(len) ∥ payload if
/// data)`, written once and never rewritten; deleting an object means the
/// index stops referencing its entry. The archive is addressed purely by
/// byte offset; there is no entry directory, the index owns that.
#[derive(Debug)]
pub struct PackArchive {
    inner: RwLock<ArchiveState>,
    max_object_size: u64,
}

#[derive(Debug)]
struct ArchiveState {
    file: File,
    size: u64,
}

impl PackArchive {
    /// Open an archive file, creating it with a magic header if absent.
    pub fn open(path: impl AsRef<Path>, max_object_size: u64) -> PackResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let size = if file_len == 0 {
            file.write_all_at(ARCHIVE_MAGIC, 0)?;
            ARCHIVE_HEADER_LEN
        } else {
            if file_len < ARCHIVE_HEADER_LEN {
                return Err(PackError::CorruptEntry {
                    offset: 0,
                    reason: "file shorter than header".into(),
                });
            }
            let mut magic = [0u8; 4];
            file.read_exact_at(&mut magic, 0)?;
            if &magic != ARCHIVE_MAGIC {
                return Err(PackError::InvalidMagic {
                    expected: String::from_utf8_lossy(ARCHIVE_MAGIC).into(),
                    actual: String::from_utf8_lossy(&magic).into(),
                });
            }
            file_len
        };

        Ok(Self {
            inner: RwLock::new(ArchiveState { file, size }),
            max_object_size,
        })
    }

    /// Append an entry, returning its starting offset.
    pub fn write_entry(&self, tag: Tag, payload: &[u8]) -> PackResult<u64> {
        let payload_len = payload.len() as u64;
        if payload_len > self.max_object_size {
            return Err(PackError::ObjectTooLarge {
                size: payload_len,
                max: self.max_object_size,
            });
        }

        let (tag_bits, escape) = tag_flag_bits(tag);
        let mut flags = FLAG_EXISTS | tag_bits;
        if !payload.is_empty() {
            flags |= FLAG_DATA;
        }

        let mut buf = Vec::with_capacity(1 + TAG_LEN + 10 + payload.len());
        buf.push(flags);
        if let Some(raw) = escape {
            buf.extend_from_slice(&raw);
        }
        if !payload.is_empty() {
            encode_varint(&mut buf, payload_len);
            buf.extend_from_slice(payload);
        }

        let mut state = self.inner.write().expect("lock poisoned");
        let offset = state.size;
        state.file.write_all_at(&buf, offset)?;
        state.size += buf.len() as u64;
        Ok(offset)
    }

    /// Read the entry starting at `offset`.
    pub fn read_entry(&self, offset: u64) -> PackResult<(Tag, Vec<u8>)> {
        let state = self.inner.read().expect("lock poisoned");
        let (tag, payload_len, payload_offset) = Self::parse_at(&state, self.max_object_size, offset)?;
        let mut payload = vec![0u8; payload_len as usize];
        state.file.read_exact_at(&mut payload, payload_offset)?;
        Ok((tag, payload))
    }

    /// Payload length of the entry at `offset`, without copying the payload.
    pub fn stat_entry(&self, offset: u64) -> PackResult<u64> {
        let state = self.inner.read().expect("lock poisoned");
        let (_, payload_len, _) = Self::parse_at(&state, self.max_object_size, offset)?;
        Ok(payload_len)
    }

    /// Current file length, which is also the next write offset.
    pub fn size(&self) -> u64 {
        self.inner.read().expect("lock poisoned").size
    }

    /// Parse the entry framing at `offset`: tag, payload length, payload
    /// start.
    fn parse_at(
        state: &ArchiveState,
        max_object_size: u64,
        offset: u64,
    ) -> PackResult<(Tag, u64, u64)> {
        if offset < ARCHIVE_HEADER_LEN || offset >= state.size {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "offset outside archive".into(),
            });
        }

        let mut flag_buf = [0u8; 1];
        state.file.read_exact_at(&mut flag_buf, offset)?;
        let flags = flag_buf[0];
        if flags & FLAG_EXISTS == 0 {
            return Err(PackError::EntryNotExist { offset });
        }

        let mut pos = offset + 1;
        let tag = if flags & FLAG_TAG_OTHER != 0 {
            if pos + TAG_LEN as u64 > state.size {
                return Err(PackError::CorruptEntry {
                    offset,
                    reason: "truncated tag escape".into(),
                });
            }
            let mut raw = [0u8; TAG_LEN];
            state.file.read_exact_at(&mut raw, pos)?;
            pos += TAG_LEN as u64;
            Tag::from_bytes(raw)
        } else {
            known_tag(flags)
        };

        let payload_len = if flags & FLAG_DATA != 0 {
            let avail = (state.size - pos).min(10) as usize;
            let mut buf = vec![0u8; avail];
            state.file.read_exact_at(&mut buf, pos)?;
            let (len, consumed) = decode_varint(&buf, pos)?;
            pos += consumed as u64;
            len
        } else {
            0
        };

        if payload_len > max_object_size {
            return Err(PackError::ObjectTooLarge {
                size: payload_len,
                max: max_object_size,
            });
        }
        if pos + payload_len > state.size {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "payload extends beyond archive".into(),
            });
        }
        Ok((tag, payload_len, pos))
    }
}
