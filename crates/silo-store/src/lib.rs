//! Loose object storage for Silo.
//!
//! This crate implements the write side of Silo's dual-representation
//! object store, analogous to git's `.git/objects/` directory: every
//! object is a file named by its content hash, sharded two directory
//! levels deep. A pack (see `silo-pack`) later consolidates loose objects;
//! until then this store is the single destination for new writes.
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Every load re-hashes the record and fails on mismatch; a loose file
//!    can never be silently returned corrupted.
//! 3. Writes are atomic (temp file + rename); concurrent writers of the
//!    same object produce identical bytes.
//! 4. Enumeration tolerates stray filesystem entries by skipping them.
//! 5. All other I/O errors are propagated, never silently ignored.

pub mod error;
pub mod loose;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use loose::LooseStore;
pub use memory::InMemoryObjectStore;
pub use traits::ObjectStore;
