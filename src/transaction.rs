//! Read and write transactions over a `Group`. A write transaction
//! works on a cloned `Group` so an in-flight reader's view keeps seeing
//! the refs it started with: every mutation through `column.rs`/
//! `btree.rs` allocates a fresh node rather than overwriting one in
//! place, so the clone and the original never collide on a byte.
//!
//! The single `&'a mut Allocator` borrow a `WriteTransaction` holds is
//! also what keeps a second writer from ever opening concurrently —
//! the borrow checker rejects it before any runtime check would need
//! to, which is why `StorageError::BusyWriter` has no caller here.

use crate::error::{CoreError, CoreResult};
use crate::file::{Allocator, VersionPin};
use crate::group::Group;

/// A read-only view of `group` as of the version the pin covers.
/// Holding this keeps the allocator from recycling any block that view
/// depends on, even once later write transactions commit.
pub struct ReadTransaction<'a> {
    _pin: VersionPin<'a>,
    pub group: Group,
    version: u64,
}

impl<'a> ReadTransaction<'a> {
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// A mutable working copy of `group`. Nothing is visible to readers
/// until `commit` bumps the allocator's version; `rollback` discards
/// every block the transaction allocated and drops the working copy.
pub struct WriteTransaction<'a> {
    /// Public, and a plain field rather than an accessor method, so
    /// callers can borrow it and `group` at the same time (e.g.
    /// `wt.group.table_mut(name).unwrap().set(wt.allocator, ...)`) —
    /// going through a `&mut self` method here would make the borrow
    /// checker see one opaque borrow of the whole transaction instead
    /// of two disjoint field borrows.
    pub allocator: &'a mut Allocator,
    pub group: Group,
    base_version: u64,
}

impl<'a> WriteTransaction<'a> {
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Publishes the transaction's mutations as a new committed
    /// version and returns it along with the mutated group, which the
    /// caller keeps as the new canonical in-memory state.
    ///
    /// Builds the new top-ref via `Group::encode` before committing, so
    /// the published version's top-ref genuinely refers to every
    /// table/column array this transaction touched, per the durability
    /// dance in `file.rs`.
    pub fn commit(self) -> CoreResult<(u64, Group)> {
        let top_ref = self.group.encode(self.allocator).map_err(CoreError::Storage)?;
        let version = self.allocator.commit(top_ref)?;
        Ok((version, self.group))
    }

    /// Discards the working copy and every block it allocated.
    pub fn rollback(self) {
        self.allocator.rollback();
    }
}

/// Pins `base.committed_version()` and hands back a snapshot clone of
/// `group` to read from. The clone is free: it shares every B+-tree
/// node with `group` until the next writer mutates one of them.
pub fn begin_read<'a>(allocator: &'a Allocator, group: &Group) -> ReadTransaction<'a> {
    let version = allocator.committed_version();
    ReadTransaction {
        _pin: allocator.pin_version(version),
        group: group.clone(),
        version,
    }
}

/// Clones `group` into a working copy the caller mutates freely and
/// either `commit`s or `rollback`s.
pub fn begin_write<'a>(allocator: &'a mut Allocator, group: &Group) -> WriteTransaction<'a> {
    let base_version = allocator.committed_version();
    WriteTransaction {
        group: group.clone(),
        allocator,
        base_version,
    }
}

/// Re-opens a read transaction at the allocator's latest committed
/// version, dropping the old pin once the new one is in place (the
/// drop order here matters only for readability; they pin distinct
/// version numbers whenever a commit happened in between).
pub fn advance_read<'a>(allocator: &'a Allocator, group: &Group) -> ReadTransaction<'a> {
    begin_read(allocator, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnValue;
    use crate::spec::{ColumnDef, Types};
    use tempfile::tempdir;

    fn new_allocator() -> (tempfile::TempDir, Allocator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.realm");
        let a = Allocator::create(&path).unwrap();
        (dir, a)
    }

    #[test]
    fn write_transaction_commit_publishes_a_new_version() {
        let (_dir, mut a) = new_allocator();
        let mut group = Group::new();
        let v0 = a.committed_version();

        let mut wt = begin_write(&mut a, &group);
        wt.group.add_table("T").unwrap();
        let (v1, committed_group) = wt.commit().unwrap();

        assert_eq!(v1, v0 + 1);
        group = committed_group;
        assert!(group.table("T").is_some());
    }

    #[test]
    fn rollback_discards_mutations_and_reclaims_allocated_blocks() {
        let (_dir, mut a) = new_allocator();
        let mut group = Group::new();
        {
            let mut wt = begin_write(&mut a, &group);
            wt.group.add_table("T").unwrap();
            wt.group
                .table_mut("T")
                .unwrap()
                .add_column(wt.allocator, ColumnDef::new("v", Types::Int))
                .unwrap();
            wt.rollback();
        }
        // nothing committed: the caller's group is untouched and the
        // allocator's watermark is back where it started.
        assert!(group.table("T").is_none());
        let v0 = a.committed_version();

        let mut wt = begin_write(&mut a, &group);
        wt.group.add_table("U").unwrap();
        let (v1, new_group) = wt.commit().unwrap();
        assert_eq!(v1, v0 + 1);
        group = new_group;
        assert!(group.table("U").is_some());
    }

    #[test]
    fn read_transaction_keeps_reading_its_pinned_version_after_a_later_commit() {
        let (_dir, mut a) = new_allocator();
        let mut group = Group::new();
        {
            let mut wt = begin_write(&mut a, &group);
            let t = wt.group.add_table("T").unwrap();
            t.add_column(wt.allocator, ColumnDef::new("v", Types::Int)).unwrap();
            let row = t.insert_row(wt.allocator).unwrap();
            t.set(wt.allocator, row, 0, ColumnValue::Int(1)).unwrap();
            let (_v, g) = wt.commit().unwrap();
            group = g;
        }

        let rt = begin_read(&a, &group);
        assert_eq!(
            rt.group.table("T").unwrap().get(&a, 0, 0).unwrap(),
            ColumnValue::Int(1)
        );

        // a later write that overwrites the same row must not disturb
        // what the still-open read transaction sees.
        {
            let mut wt = begin_write(&mut a, &group);
            wt.group
                .table_mut("T")
                .unwrap()
                .set(wt.allocator, 0, 0, ColumnValue::Int(2))
                .unwrap();
            let (_v, g) = wt.commit().unwrap();
            group = g;
        }

        assert_eq!(
            rt.group.table("T").unwrap().get(&a, 0, 0).unwrap(),
            ColumnValue::Int(1)
        );
        let rt2 = advance_read(&a, &group);
        assert_eq!(
            rt2.group.table("T").unwrap().get(&a, 0, 0).unwrap(),
            ColumnValue::Int(2)
        );
    }
}
