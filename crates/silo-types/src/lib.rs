//! Foundation types for Silo.
//!
//! Everything stored by Silo is addressed by a [`ContentId`]: the truncated
//! SHA-256 hash of an object's 4-byte type [`Tag`] and payload, hashed
//! together. These types are shared by every storage layer (loose files,
//! pack archives, the object database façade) and define the identity and
//! ordering used throughout the on-disk formats.

pub mod error;
pub mod id;
pub mod tag;

pub use error::TypeError;
pub use id::{ContentId, ID_HEX_LEN, ID_LEN};
pub use tag::{Tag, TAG_LEN};
