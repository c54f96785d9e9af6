//! B+-tree over packed arrays: the positional index structure behind
//! every column's row storage. A leaf is a plain `Array` holding up to
//! `LEAF_MAX` values directly. An inner node is a two-element
//! `has_refs` array `[offsets_ref, children_ref]`: `offsets_ref` points
//! at a plain array of per-child inclusive cumulative sizes,
//! `children_ref` at a `has_refs` array of child refs. The two arrays
//! are always the same length — that parallelism is the inner-node
//! invariant every method here preserves.

use crate::array::Array;
use crate::error::StorageError;
use crate::file::{Ref, Storage};

/// Above this many elements a leaf splits in two. `BpTree` carries this
/// as a field rather than hardcoding it so tests can exercise a split
/// at a small, checkable boundary instead of only ever at production
/// scale.
pub const LEAF_MAX: usize = 1000;

enum Loaded {
    Leaf(Array),
    Inner { offsets: Array, children: Array },
}

fn load(storage: &impl Storage, r: Ref) -> Result<Loaded, StorageError> {
    let bytes = storage.read(r)?.to_vec();
    let node = Array::decode(&bytes)?;
    if !node.is_inner_node {
        return Ok(Loaded::Leaf(node));
    }
    let offsets_ref = Ref(node.get(0)? as u64);
    let children_ref = Ref(node.get(1)? as u64);
    let offsets = Array::decode(&storage.read(offsets_ref)?.to_vec())?;
    let children = Array::decode(&storage.read(children_ref)?.to_vec())?;
    Ok(Loaded::Inner { offsets, children })
}

fn store(storage: &mut impl Storage, array: &Array) -> Result<Ref, StorageError> {
    storage.alloc(&array.encode(0)?)
}

fn store_inner(
    storage: &mut impl Storage,
    offsets: &Array,
    children: &Array,
) -> Result<Ref, StorageError> {
    let offsets_ref = store(storage, offsets)?;
    let children_ref = store(storage, children)?;
    let mut node = Array::from_values(vec![offsets_ref.0 as i64, children_ref.0 as i64]);
    node.is_inner_node = true;
    node.has_refs = true;
    store(storage, &node)
}

/// Result of inserting into a subtree: either it still fits in its
/// current node(s), or it grew a new sibling that the caller must
/// link in as an additional child.
enum Grown {
    Fit(Ref),
    Split { left: Ref, right: Ref, left_size: usize },
}

/// A positional B+-tree, identified by the ref of its root node. Cheap
/// to clone: a clone shares the same on-disk nodes until the next
/// mutation, since every mutating operation replaces nodes by
/// allocating fresh ones rather than writing through the old ref.
#[derive(Clone, Copy)]
pub struct BpTree {
    root: Ref,
    leaf_max: usize,
}

impl BpTree {
    /// Creates a fresh, empty tree (a single empty leaf) and persists
    /// it, returning a handle holding its root ref.
    pub fn create(storage: &mut impl Storage) -> Result<BpTree, StorageError> {
        Self::create_with_leaf_max(storage, LEAF_MAX)
    }

    /// As `create`, but splits leaves past `leaf_max` elements instead
    /// of the production `LEAF_MAX`. Exists so tests can drive an
    /// actual split at a small, hand-checkable boundary.
    pub fn create_with_leaf_max(storage: &mut impl Storage, leaf_max: usize) -> Result<BpTree, StorageError> {
        let root = store(storage, &Array::new())?;
        Ok(BpTree { root, leaf_max })
    }

    /// Reopens a tree whose root ref is already known (e.g. read back
    /// out of a column's header array), at the production `LEAF_MAX`.
    pub fn open(root: Ref) -> BpTree {
        BpTree { root, leaf_max: LEAF_MAX }
    }

    pub fn root(&self) -> Ref {
        self.root
    }

    pub fn len(&self, storage: &impl Storage) -> Result<usize, StorageError> {
        match load(storage, self.root)? {
            Loaded::Leaf(a) => Ok(a.len()),
            Loaded::Inner { offsets, .. } => {
                Ok(offsets.get(offsets.len() - 1)? as usize)
            }
        }
    }

    pub fn is_empty(&self, storage: &impl Storage) -> Result<bool, StorageError> {
        Ok(self.len(storage)? == 0)
    }

    pub fn get(&self, storage: &impl Storage, index: usize) -> Result<i64, StorageError> {
        Self::get_at(storage, self.root, index)
    }

    fn get_at(storage: &impl Storage, node: Ref, index: usize) -> Result<i64, StorageError> {
        match load(storage, node)? {
            Loaded::Leaf(a) => a.get(index),
            Loaded::Inner { offsets, children } => {
                let (child_idx, local) = locate(&offsets, index)?;
                let child = Ref(children.get(child_idx)? as u64);
                Self::get_at(storage, child, local)
            }
        }
    }

    pub fn set(&self, storage: &mut impl Storage, index: usize, value: i64) -> Result<(), StorageError> {
        Self::set_at(storage, self.root, index, value)
    }

    fn set_at(storage: &mut impl Storage, node: Ref, index: usize, value: i64) -> Result<(), StorageError> {
        match load(storage, node)? {
            Loaded::Leaf(mut a) => {
                a.set(index, value)?;
                storage.write_node(node, &a)
            }
            Loaded::Inner { offsets, children } => {
                let (child_idx, local) = locate(&offsets, index)?;
                let child = Ref(children.get(child_idx)? as u64);
                Self::set_at(storage, child, local, value)
            }
        }
    }

    /// Inserts `value` so it becomes element `index` (append with
    /// `index == len`).
    pub fn insert(&mut self, storage: &mut impl Storage, index: usize, value: i64) -> Result<(), StorageError> {
        match Self::insert_at(storage, self.root, index, value, self.leaf_max)? {
            Grown::Fit(r) => self.root = r,
            Grown::Split { left, right, left_size } => {
                let mut offsets = Array::new();
                offsets.push(left_size as i64);
                offsets.push((left_size + Self::subtree_len(storage, right)?) as i64);
                let mut children = Array::new();
                children.has_refs = true;
                children.push(left.0 as i64);
                children.push(right.0 as i64);
                self.root = store_inner(storage, &offsets, &children)?;
            }
        }
        Ok(())
    }

    fn subtree_len(storage: &impl Storage, r: Ref) -> Result<usize, StorageError> {
        match load(storage, r)? {
            Loaded::Leaf(a) => Ok(a.len()),
            Loaded::Inner { offsets, .. } => Ok(offsets.get(offsets.len() - 1)? as usize),
        }
    }

    fn insert_at(storage: &mut impl Storage, node: Ref, index: usize, value: i64, leaf_max: usize) -> Result<Grown, StorageError> {
        match load(storage, node)? {
            Loaded::Leaf(mut a) => {
                a.insert(index, value)?;
                if a.len() <= leaf_max {
                    Ok(Grown::Fit(storage.replace_node(node, &a)?))
                } else {
                    let split_at = leaf_max;
                    let mut right_values = Vec::new();
                    while a.len() > split_at {
                        right_values.push(a.erase(split_at)?);
                    }
                    let right = Array::from_values(right_values);
                    let left_size = a.len();
                    let left_ref = storage.replace_node(node, &a)?;
                    let right_ref = store(storage, &right)?;
                    Ok(Grown::Split {
                        left: left_ref,
                        right: right_ref,
                        left_size,
                    })
                }
            }
            Loaded::Inner { mut offsets, mut children } => {
                let (child_idx, local) = locate(&offsets, index)?;
                let child = Ref(children.get(child_idx)? as u64);
                match Self::insert_at(storage, child, local, value, leaf_max)? {
                    Grown::Fit(new_child) => {
                        children.set(child_idx, new_child.0 as i64)?;
                        recompute_offsets_from_children(storage, &mut offsets, &children)?;
                        Ok(Grown::Fit(storage.replace_inner(node, &offsets, &children)?))
                    }
                    Grown::Split { left, right, left_size } => {
                        children.set(child_idx, left.0 as i64)?;
                        children.insert(child_idx + 1, right.0 as i64)?;
                        let prev_cum = if child_idx == 0 { 0 } else { offsets.get(child_idx - 1)? };
                        offsets.set(child_idx, prev_cum + left_size as i64)?;
                        offsets.insert(child_idx + 1, prev_cum + left_size as i64 + 1)?;
                        // re-derive every cumulative offset from the (now
                        // authoritative) per-child sizes, since the split
                        // changed the child count.
                        recompute_offsets_from_children(storage, &mut offsets, &children)?;
                        if children.len() <= leaf_max {
                            Ok(Grown::Fit(storage.replace_inner(node, &offsets, &children)?))
                        } else {
                            let split = children.len() / 2;
                            let mut right_children = Array::new();
                            right_children.has_refs = true;
                            while children.len() > split {
                                right_children.push(children.erase(split)?);
                            }
                            let mut right_offsets = Array::new();
                            recompute_offsets_from_children(storage, &mut right_offsets, &right_children)?;
                            let mut left_offsets = Array::new();
                            recompute_offsets_from_children(storage, &mut left_offsets, &children)?;
                            let left_size = *left_offsets.as_slice().last().unwrap_or(&0) as usize;
                            let left_ref = storage.replace_inner(node, &left_offsets, &children)?;
                            let right_ref = store_inner(storage, &right_offsets, &right_children)?;
                            Ok(Grown::Split { left: left_ref, right: right_ref, left_size })
                        }
                    }
                }
            }
        }
    }

    /// Erases element `index`. Leaves are never merged back together
    /// on erase (matching the original format's policy of leaving
    /// sparse nodes until an explicit compaction pass); only the
    /// offsets bookkeeping is kept exact.
    pub fn erase(&mut self, storage: &mut impl Storage, index: usize) -> Result<i64, StorageError> {
        let (new_root, erased) = Self::erase_at(storage, self.root, index)?;
        self.root = new_root;
        Ok(erased)
    }

    fn erase_at(storage: &mut impl Storage, node: Ref, index: usize) -> Result<(Ref, i64), StorageError> {
        match load(storage, node)? {
            Loaded::Leaf(mut a) => {
                let erased = a.erase(index)?;
                Ok((storage.replace_node(node, &a)?, erased))
            }
            Loaded::Inner { mut offsets, children } => {
                let (child_idx, local) = locate(&offsets, index)?;
                let child = Ref(children.get(child_idx)? as u64);
                let (new_child, erased) = Self::erase_at(storage, child, local)?;
                let mut children = children;
                children.set(child_idx, new_child.0 as i64)?;
                recompute_offsets_from_children(storage, &mut offsets, &children)?;
                Ok((storage.replace_inner(node, &offsets, &children)?, erased))
            }
        }
    }
}

/// Binary-searches `offsets` (inclusive cumulative sizes) for the
/// child owning logical index `index`, returning (child index, index
/// local to that child).
fn locate(offsets: &Array, index: usize) -> Result<(usize, usize), StorageError> {
    let child_idx = offsets.upper_bound(index as i64).min(offsets.len().saturating_sub(1));
    let prev_cum = if child_idx == 0 { 0 } else { offsets.get(child_idx - 1)? };
    let local = index as i64 - prev_cum;
    if local < 0 {
        return Err(StorageError::Corruption("offsets/index invariant violated".into()));
    }
    Ok((child_idx, local as usize))
}

fn recompute_offsets_from_children(
    storage: &impl Storage,
    offsets: &mut Array,
    children: &Array,
) -> Result<(), StorageError> {
    while offsets.len() > 0 {
        offsets.erase(0)?;
    }
    let mut cum = 0i64;
    for i in 0..children.len() {
        let child = Ref(children.get(i)? as u64);
        cum += BpTree::subtree_len(storage, child)? as i64;
        offsets.push(cum);
    }
    Ok(())
}

/// Extra `Storage` convenience methods the tree needs: replacing a
/// node's bytes in place conceptually frees the old block and
/// allocates a new one, since the underlying allocator is copy-on-write.
pub trait StorageExt: Storage {
    fn write_node(&mut self, old: Ref, array: &Array) -> Result<(), StorageError> {
        self.replace_node(old, array).map(|_| ())
    }

    fn replace_node(&mut self, old: Ref, array: &Array) -> Result<Ref, StorageError> {
        self.free(old);
        self.alloc(&array.encode(0)?)
    }

    fn replace_inner(&mut self, old: Ref, offsets: &Array, children: &Array) -> Result<Ref, StorageError> {
        self.free(old);
        let offsets_ref = self.alloc(&offsets.encode(0)?)?;
        let children_ref = self.alloc(&children.encode(0)?)?;
        let mut node = Array::from_values(vec![offsets_ref.0 as i64, children_ref.0 as i64]);
        node.is_inner_node = true;
        node.has_refs = true;
        self.alloc(&node.encode(0)?)
    }
}

impl<T: Storage + ?Sized> StorageExt for T {}
