use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte width of a type tag.
pub const TAG_LEN: usize = 4;

/// Object type tag: a 4-byte ASCII marker stored alongside every payload.
///
/// The tag participates in content hashing, so the same bytes stored under
/// different tags produce different [`ContentId`](crate::ContentId)s. The
/// four well-known tags cover the version-control object kinds; `Other`
/// carries any custom 4-byte tag verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// A file manifest (ordered list of part ids).
    File,
    /// A content-defined chunk of file data.
    Part,
    /// A directory listing.
    Tree,
    /// A revision (commit) record.
    Edit,
    /// Any other 4-byte tag.
    Other([u8; TAG_LEN]),
}

impl Tag {
    /// The raw 4-byte representation.
    pub const fn as_bytes(&self) -> [u8; TAG_LEN] {
        match self {
            Self::File => *b"FILE",
            Self::Part => *b"PART",
            Self::Tree => *b"TREE",
            Self::Edit => *b"EDIT",
            Self::Other(raw) => *raw,
        }
    }

    /// Parse from raw bytes. Well-known tags are canonicalized; anything
    /// else round-trips through `Other`.
    pub fn from_bytes(raw: [u8; TAG_LEN]) -> Self {
        match &raw {
            b"FILE" => Self::File,
            b"PART" => Self::Part,
            b"TREE" => Self::Tree,
            b"EDIT" => Self::Edit,
            _ => Self::Other(raw),
        }
    }

    /// Returns `true` for the four well-known tags.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.as_bytes();
        for b in raw {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}
