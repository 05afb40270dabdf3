//! The Silo object database: one lookup surface over two representations.
//!
//! Fresh objects are written loose (one sharded file each, cheap to add
//! and delete); history gets consolidated into a pack (one sorted index
//! plus append-only archives, cheap to keep and search). [`ObjectDb`]
//! hides the split: `load` and `stat` try loose first and fall through
//! to the pack, `deabbreviate` reconciles both, and the packed side is
//! only ever rewritten wholesale through the crash-safe
//! [`swap_pack`](ObjectDb::swap_pack) / [`repack`](ObjectDb::repack)
//! path.

pub mod db;
pub mod error;

pub use db::{ObjectDb, StoreEvent};
pub use error::{OdbError, OdbResult};

pub use silo_pack::PackOptions;
