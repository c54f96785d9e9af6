//! Memory-mapped slab allocator over a single backing file. Produces
//! and recycles 8-byte-aligned blocks and translates `Ref`s to byte
//! slices in O(1) via the active mapping.
//!
//! Raw pointers and manual `mmap`/`munmap` calls (as the teacher's
//! `MappedFile` used for a read-only filesystem image) are replaced
//! here with `memmap2`'s safe-ish `MmapMut`, since this file is
//! read-write and needs to grow.

use crate::error::StorageError;
use log::debug;
use memmap2::MmapMut;
use std::collections::HashMap;
use std::fs::{File as StdFile, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 8] = b"RCORERS1";
pub const CURRENT_FILE_FORMAT_VERSION: u32 = 1;
pub const FILE_HEADER_SIZE: usize = 64;
/// A ref's low bits must fit the 24-bit size convention used by array
/// headers; this bounds how large the backing file may grow.
pub const MAX_FILE_SIZE: u64 = 1 << 40;

/// A non-negative integer denoting a position in the backing file.
/// Newtype instead of a raw pointer: refs are stable across remaps and
/// safe to store, hash, and compare without unsafe code at the call
/// site (see the redesign note on raw pointer refs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(pub u64);

impl Ref {
    pub const NULL: Ref = Ref(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Trait the B+-tree, column and table layers program against instead
/// of a concrete file handle, so tests can run entirely in memory
/// without touching disk while `File` implements the same contract
/// for real persistence.
pub trait Storage {
    fn alloc(&mut self, bytes: &[u8]) -> Result<Ref, StorageError>;
    fn free(&mut self, r: Ref);
    fn read(&self, r: Ref) -> Result<&[u8], StorageError>;
    fn is_read_only(&self, r: Ref) -> bool;
}

/// Tracks how many live readers are pinned at each committed version,
/// so free blocks from an old version aren't reused while a reader
/// might still translate a ref into them.
#[derive(Default)]
struct VersionRefcounts {
    counts: HashMap<u64, u64>,
}

impl VersionRefcounts {
    fn pin(&mut self, version: u64) {
        *self.counts.entry(version).or_insert(0) += 1;
    }

    fn unpin(&mut self, version: u64) {
        if let Some(c) = self.counts.get_mut(&version) {
            *c -= 1;
            if *c == 0 {
                self.counts.remove(&version);
            }
        }
    }

    fn min_pinned(&self) -> Option<u64> {
        self.counts.keys().copied().min()
    }
}

/// RAII guard returned by `Allocator::pin_version`; dropping it unpins.
pub struct VersionPin<'a> {
    allocator: &'a std::sync::Mutex<VersionRefcounts>,
    version: u64,
}

impl<'a> Drop for VersionPin<'a> {
    fn drop(&mut self) {
        self.allocator.lock().unwrap().unpin(self.version);
    }
}

struct FreeBlock {
    pos: u64,
    size: u64,
    freed_at_version: u64,
}

/// Owns the mmap'd backing file, the free list, and the bump-allocation
/// watermark. `Allocator` is the only thing in the crate that knows
/// about byte offsets; everything above it deals in `Ref`.
pub struct Allocator {
    path: PathBuf,
    file: StdFile,
    mmap: MmapMut,
    len: u64,
    /// End of the region that belongs to a fully committed version;
    /// refs below this are read-only from the point of view of any
    /// transaction currently in flight.
    committed_high_water: u64,
    free_list: Vec<FreeBlock>,
    pending_free: Vec<(Ref, u64)>,
    committed_version: u64,
    refcounts: std::sync::Mutex<VersionRefcounts>,
}

fn round_up_8(n: u64) -> u64 {
    (n + 7) & !7
}

impl Allocator {
    pub fn create(path: &Path) -> Result<Allocator, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut header = [0u8; FILE_HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&CURRENT_FILE_FORMAT_VERSION.to_le_bytes());
        // top_ref_a, top_ref_b both zero (no group yet); selector = 0
        file.set_len(FILE_HEADER_SIZE as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.sync_all()?;
        Self::open(path)
    }

    pub fn open(path: &Path) -> Result<Allocator, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len().max(FILE_HEADER_SIZE as u64);
        file.set_len(len)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        if &mmap[0..8] != MAGIC {
            return Err(StorageError::FileFormatUnsupported {
                found: 0,
                max: CURRENT_FILE_FORMAT_VERSION,
            });
        }
        let version = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if version > CURRENT_FILE_FORMAT_VERSION {
            return Err(StorageError::FileFormatUnsupported {
                found: version,
                max: CURRENT_FILE_FORMAT_VERSION,
            });
        }
        Ok(Allocator {
            path: path.to_path_buf(),
            file,
            mmap,
            len,
            committed_high_water: len,
            free_list: Vec::new(),
            pending_free: Vec::new(),
            committed_version: 0,
            refcounts: std::sync::Mutex::new(VersionRefcounts::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn selector(&self) -> u32 {
        u32::from_le_bytes(self.mmap[28..32].try_into().unwrap())
    }

    /// The currently active top-ref, or `Ref::NULL` for a fresh file.
    pub fn active_top_ref(&self) -> Ref {
        let offset = if self.selector() & 1 == 0 { 12 } else { 20 };
        let bytes: [u8; 8] = self.mmap[offset..offset + 8].try_into().unwrap();
        Ref(u64::from_le_bytes(bytes))
    }

    /// Allocates a fresh, zeroed, 8-byte-aligned block of at least
    /// `size` bytes and returns its ref. Reuses a free-list entry when
    /// one is large enough, otherwise grows the file.
    pub fn alloc(&mut self, size: u64) -> Result<Ref, StorageError> {
        let size = round_up_8(size.max(8));
        if let Some(idx) = self
            .free_list
            .iter()
            .position(|b| b.size >= size && self.min_pinned_version() > b.freed_at_version)
        {
            let block = self.free_list.remove(idx);
            self.mmap[block.pos as usize..(block.pos + size) as usize].fill(0);
            return Ok(Ref(block.pos));
        }
        let pos = self.len;
        let new_len = pos + size;
        if new_len >= MAX_FILE_SIZE {
            return Err(StorageError::FileTooLarge { requested: size });
        }
        self.file.set_len(new_len)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.len = new_len;
        self.mmap[pos as usize..new_len as usize].fill(0);
        Ok(Ref(pos))
    }

    pub fn write_at(&mut self, r: Ref, bytes: &[u8]) -> Result<(), StorageError> {
        let start = r.0 as usize;
        let end = start + bytes.len();
        if end > self.mmap.len() {
            return Err(StorageError::Corruption("write past end of mapping".into()));
        }
        self.mmap[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn min_pinned_version(&self) -> u64 {
        self.refcounts
            .lock()
            .unwrap()
            .min_pinned()
            .unwrap_or(u64::MAX)
    }

    pub fn is_read_only(&self, r: Ref) -> bool {
        r.0 < self.committed_high_water
    }

    /// Stages a block for reclamation; it becomes reusable once no
    /// reader remains pinned at-or-below the version that freed it.
    pub fn free(&mut self, r: Ref, size: u64) {
        self.pending_free.push((r, round_up_8(size.max(8))));
    }

    pub fn read(&self, r: Ref) -> Result<&[u8], StorageError> {
        if r.0 as usize >= self.mmap.len() {
            return Err(StorageError::IndexOutOfBounds {
                index: r.0 as usize,
                size: self.mmap.len(),
            });
        }
        Ok(&self.mmap[r.0 as usize..])
    }

    /// Atomically publishes `top_ref`: write it into the inactive
    /// candidate slot, fsync, flip the selector byte, fsync again. A
    /// crash before the second fsync leaves the file opening to the
    /// pre-commit top-ref.
    pub fn commit(&mut self, top_ref: Ref) -> Result<u64, StorageError> {
        let inactive_offset = if self.selector() & 1 == 0 { 20 } else { 12 };
        self.mmap[inactive_offset..inactive_offset + 8].copy_from_slice(&top_ref.0.to_le_bytes());
        self.mmap.flush_range(inactive_offset, 8)?;
        self.file.sync_all()?;

        let new_selector = self.selector() ^ 1;
        self.mmap[28..32].copy_from_slice(&new_selector.to_le_bytes());
        self.mmap.flush_range(28, 4)?;
        self.file.sync_all()?;

        let version_before_free = self.committed_version;
        self.committed_version += 1;
        self.committed_high_water = self.len;
        for (r, size) in self.pending_free.drain(..) {
            self.free_list.push(FreeBlock {
                pos: r.0,
                size,
                freed_at_version: version_before_free,
            });
        }
        debug!(
            "committed version {} with top_ref {:?}",
            self.committed_version, top_ref
        );
        Ok(self.committed_version)
    }

    /// Discards every block allocated since the last commit. Safe
    /// because allocation only ever grows `len` past
    /// `committed_high_water`, and the single `&mut Allocator` borrow a
    /// write transaction holds means nothing else could have taken a
    /// ref into that region in the meantime.
    pub fn rollback(&mut self) {
        self.pending_free.clear();
        self.len = self.committed_high_water;
    }

    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    pub fn pin_version(&self, version: u64) -> VersionPin<'_> {
        self.refcounts.lock().unwrap().pin(version);
        VersionPin {
            allocator: &self.refcounts,
            version,
        }
    }
}

impl Storage for Allocator {
    fn alloc(&mut self, bytes: &[u8]) -> Result<Ref, StorageError> {
        let r = self.alloc(bytes.len() as u64)?;
        self.write_at(r, bytes)?;
        Ok(r)
    }

    fn free(&mut self, r: Ref) {
        // size unknown from a bare ref without reading its header;
        // callers that know the array's capacity should use
        // `Allocator::free(ref, size)` directly. This impl reads the
        // capacity field out of the array header at `r`.
        if let Ok(bytes) = self.read(r) {
            if let Ok(header) = crate::array::ArrayHeader::from_bytes(bytes) {
                let size = header.capacity.max(8) as u64;
                Allocator::free(self, r, size);
                return;
            }
        }
        Allocator::free(self, r, 8);
    }

    fn read(&self, r: Ref) -> Result<&[u8], StorageError> {
        Allocator::read(self, r)
    }

    fn is_read_only(&self, r: Ref) -> bool {
        Allocator::is_read_only(self, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_open_roundtrip() -> Result<(), StorageError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.realm");
        let written_ref = {
            let mut a = Allocator::create(&path)?;
            assert_eq!(a.active_top_ref(), Ref::NULL);
            let r = a.alloc(16)?;
            a.write_at(r, b"hello world 1234")?;
            let v = a.commit(r)?;
            assert_eq!(v, 1);
            r
        };
        let a = Allocator::open(&path)?;
        assert_eq!(a.active_top_ref(), written_ref);
        assert_eq!(&a.read(written_ref)?[..16], b"hello world 1234");
        Ok(())
    }

    #[test]
    fn alloc_is_8_aligned_and_blocked_by_pinned_reader() -> Result<(), StorageError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.realm");
        let mut a = Allocator::create(&path)?;
        let r1 = a.alloc(16)?;
        assert_eq!(r1.0 % 8, 0);
        a.commit(r1)?; // version 1, r1 is live
        let v1 = a.committed_version();
        let v1_pin = a.pin_version(v1);

        a.free(r1, 16);
        a.commit(r1)?; // version 2, r1 freed_at_version=1

        let r2 = a.alloc(16)?;
        assert_ne!(r1, r2, "a reader pinned at version 1 still needs r1's bytes");

        drop(v1_pin);
        let r3 = a.alloc(16)?;
        assert_eq!(r1, r3, "once unpinned the freed block becomes reusable");
        Ok(())
    }

    #[test]
    fn is_read_only_tracks_commit_boundary() -> Result<(), StorageError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.realm");
        let mut a = Allocator::create(&path)?;
        let r1 = a.alloc(8)?;
        assert!(!a.is_read_only(r1), "uncommitted block is mutable");
        a.commit(r1)?;
        assert!(a.is_read_only(r1), "committed block must not be mutated");
        Ok(())
    }
}
