//! Sorted-array algorithms over an abstract entry table.
//!
//! The pack index is a mutable sorted array that happens to live in a
//! file. Everything order-related (binary search, bubble insertion,
//! swap-chain deletion, the batch sort) is written against the
//! [`EntryTable`] trait so the algorithms are file-format-agnostic and can
//! be exercised against an in-memory fake.

use silo_types::ContentId;

use crate::entry::IndexEntry;
use crate::error::PackResult;

/// Random-access storage for a flat array of index entries.
pub(crate) trait EntryTable {
    /// Number of entries.
    fn len(&self) -> u64;

    /// Read entry `i`.
    fn read(&self, i: u64) -> PackResult<IndexEntry>;

    /// Overwrite entry `i`.
    fn write(&mut self, i: u64, entry: &IndexEntry) -> PackResult<()>;

    /// Append one entry past the current end.
    fn append(&mut self, entry: &IndexEntry) -> PackResult<()>;

    /// Drop the last entry.
    fn truncate_last(&mut self) -> PackResult<()>;

    /// Exchange entries `i` and `j`.
    fn swap(&mut self, i: u64, j: u64) -> PackResult<()> {
        let a = self.read(i)?;
        let b = self.read(j)?;
        self.write(i, &b)?;
        self.write(j, &a)
    }
}

/// How [`insert`] placed an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// New maximum, appended at the tail.
    Appended,
    /// An entry with the same id existed and was overwritten in place.
    Replaced,
    /// Appended at the tail and bubbled backward into its slot.
    Inserted,
}

/// First index in `[lo, hi)` whose id is `>= id`.
pub(crate) fn lower_bound<T: EntryTable + ?Sized>(
    table: &T,
    mut lo: u64,
    mut hi: u64,
    id: &ContentId,
) -> PackResult<u64> {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if table.read(mid)?.id < *id {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Position of the entry with exactly `id` within `[lo, hi)`, if present.
pub(crate) fn find<T: EntryTable + ?Sized>(
    table: &T,
    lo: u64,
    hi: u64,
    id: &ContentId,
) -> PackResult<Option<u64>> {
    let at = lower_bound(table, lo, hi, id)?;
    if at < hi && table.read(at)?.id == *id {
        Ok(Some(at))
    } else {
        Ok(None)
    }
}

/// Insert `entry` while keeping the array sorted.
///
/// Fast path: a new maximum is appended directly. An existing entry with
/// the same id is overwritten in place. Otherwise the entry is appended at
/// the tail and swapped backward one slot at a time until it reaches its
/// insertion point, so the array never holds a hole mid-operation.
pub(crate) fn insert<T: EntryTable + ?Sized>(
    table: &mut T,
    entry: &IndexEntry,
) -> PackResult<InsertOutcome> {
    let len = table.len();
    let at = lower_bound(table, 0, len, &entry.id)?;
    if at == len {
        table.append(entry)?;
        return Ok(InsertOutcome::Appended);
    }
    if table.read(at)?.id == entry.id {
        table.write(at, entry)?;
        return Ok(InsertOutcome::Replaced);
    }
    table.append(entry)?;
    let mut pos = len;
    while pos > at {
        table.swap(pos - 1, pos)?;
        pos -= 1;
    }
    Ok(InsertOutcome::Inserted)
}

/// Remove the entry at `at` by swapping it to the tail and truncating.
pub(crate) fn remove_at<T: EntryTable + ?Sized>(
    table: &mut T,
    at: u64,
) -> PackResult<IndexEntry> {
    let len = table.len();
    let entry = table.read(at)?;
    let mut pos = at;
    while pos + 1 < len {
        table.swap(pos, pos + 1)?;
        pos += 1;
    }
    table.truncate_last()?;
    Ok(entry)
}

/// In-place heapsort by id. Swap-driven, O(n log n), no extra storage.
pub(crate) fn sort<T: EntryTable + ?Sized>(table: &mut T) -> PackResult<()> {
    let n = table.len();
    if n < 2 {
        return Ok(());
    }
    let mut i = n / 2;
    while i > 0 {
        i -= 1;
        sift_down(table, i, n)?;
    }
    let mut end = n;
    while end > 1 {
        end -= 1;
        table.swap(0, end)?;
        sift_down(table, 0, end)?;
    }
    Ok(())
}

fn sift_down<T: EntryTable + ?Sized>(table: &mut T, mut root: u64, end: u64) -> PackResult<()> {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            return Ok(());
        }
        let mut child_id = table.read(child)?.id;
        if child + 1 < end {
            let right = table.read(child + 1)?.id;
            if right > child_id {
                child += 1;
                child_id = right;
            }
        }
        if table.read(root)?.id >= child_id {
            return Ok(());
        }
        table.swap(root, child)?;
        root = child;
    }
}
