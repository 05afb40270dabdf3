use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TypeError;
use crate::tag::Tag;

/// Byte width of a [`ContentId`].
pub const ID_LEN: usize = 20;

/// Hex width of a fully rendered [`ContentId`].
pub const ID_HEX_LEN: usize = 2 * ID_LEN;

/// Content-addressed identifier for a stored object.
///
/// A `ContentId` is the first 20 bytes of `SHA-256(tag ∥ payload)`.
/// Identical `(tag, payload)` pairs always produce the same id, which is
/// what makes objects deduplicatable and every read verifiable. Ids order
/// by unsigned lexicographic byte comparison, the sort order used by the
/// pack index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; ID_LEN]);

impl ContentId {
    /// Compute the id for a `(tag, payload)` pair.
    pub fn compute(tag: Tag, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut raw = [0u8; ID_LEN];
        raw.copy_from_slice(&digest[..ID_LEN]);
        Self(raw)
    }

    /// Wrap a pre-computed 20-byte value.
    pub const fn from_raw(raw: [u8; ID_LEN]) -> Self {
        Self(raw)
    }

    /// The raw 20 bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The first byte, used as the fanout bucket.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Full hex rendering (40 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex rendering (first 8 characters) for display.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse a full 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; ID_LEN];
        raw.copy_from_slice(&bytes);
        Ok(Self(raw))
    }

    /// The inclusive id range covered by a hex abbreviation.
    ///
    /// Pads the prefix to full hex length with `'0'` for the minimum bound
    /// and `'f'` for the maximum, so every id whose hex rendering starts
    /// with `prefix` falls inside `[min, max]`. The prefix may have odd
    /// length (a lone nibble) and is matched case-insensitively.
    pub fn prefix_range(prefix: &str) -> Result<(Self, Self), TypeError> {
        if prefix.is_empty()
            || prefix.len() > ID_HEX_LEN
            || !prefix.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(TypeError::InvalidPrefix(prefix.to_string()));
        }
        let prefix = prefix.to_ascii_lowercase();
        let mut min = prefix.clone();
        let mut max = prefix;
        while min.len() < ID_HEX_LEN {
            min.push('0');
            max.push('f');
        }
        // Both strings are full-length valid hex by construction.
        Ok((Self::from_hex(&min)?, Self::from_hex(&max)?))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short_hex())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; ID_LEN]> for ContentId {
    fn from(raw: [u8; ID_LEN]) -> Self {
        Self(raw)
    }
}

impl From<ContentId> for [u8; ID_LEN] {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compute_is_deterministic() {
        let a = ContentId::compute(Tag::Part, b"hello world");
        let b = ContentId::compute(Tag::Part, b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn tag_participates_in_hash() {
        let a = ContentId::compute(Tag::Part, b"same bytes");
        let b = ContentId::compute(Tag::Tree, b"same bytes");
        assert_ne!(a, b);
    }

    #[test]
    fn different_payloads_differ() {
        let a = ContentId::compute(Tag::Part, b"hello");
        let b = ContentId::compute(Tag::Part, b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_roundtrip() {
        let id = ContentId::compute(Tag::File, b"manifest");
        let parsed = ContentId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_hex_wrong_length() {
        let err = ContentId::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: ID_LEN,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_bad_chars() {
        assert!(matches!(
            ContentId::from_hex("zz").unwrap_err(),
            TypeError::InvalidHex(_)
        ));
    }

    #[test]
    fn display_is_full_hex() {
        let id = ContentId::compute(Tag::Edit, b"rev");
        assert_eq!(format!("{id}").len(), ID_HEX_LEN);
    }

    #[test]
    fn ordering_is_unsigned_lexicographic() {
        let lo = ContentId::from_raw([0u8; ID_LEN]);
        let mut hi_raw = [0u8; ID_LEN];
        hi_raw[0] = 0x80;
        let hi = ContentId::from_raw(hi_raw);
        assert!(lo < hi);
    }

    #[test]
    fn prefix_range_single_nibble() {
        let (min, max) = ContentId::prefix_range("a").unwrap();
        assert_eq!(min.as_bytes()[0], 0xa0);
        assert_eq!(max.as_bytes()[0], 0xaf);
        assert_eq!(&min.as_bytes()[1..], &[0u8; 19]);
        assert_eq!(&max.as_bytes()[1..], &[0xffu8; 19]);
    }

    #[test]
    fn prefix_range_full_length_is_exact() {
        let id = ContentId::compute(Tag::Part, b"exact");
        let (min, max) = ContentId::prefix_range(&id.to_hex()).unwrap();
        assert_eq!(min, id);
        assert_eq!(max, id);
    }

    #[test]
    fn prefix_range_uppercase_accepted() {
        let (min, _) = ContentId::prefix_range("AB").unwrap();
        assert_eq!(min.as_bytes()[0], 0xab);
    }

    #[test]
    fn prefix_range_rejects_bad_input() {
        assert!(ContentId::prefix_range("").is_err());
        assert!(ContentId::prefix_range("xyz").is_err());
        assert!(ContentId::prefix_range(&"a".repeat(41)).is_err());
    }

    proptest! {
        #[test]
        fn prefix_range_brackets_matching_ids(payload in proptest::collection::vec(any::<u8>(), 0..64), len in 1usize..=ID_HEX_LEN) {
            let id = ContentId::compute(Tag::Part, &payload);
            let prefix = &id.to_hex()[..len];
            let (min, max) = ContentId::prefix_range(prefix).unwrap();
            prop_assert!(min <= id && id <= max);
        }
    }
}
