//! Typed columns. Every column stores one row-indexed slot per row in
//! a `BpTree`; fixed-width scalars live in the slot itself, everything
//! else (strings, binary, 12/16-byte identifiers, mixed values) lives
//! in a separately allocated blob that the slot merely points at via
//! its `Ref`. A nullable column additionally keeps a parallel 0/1
//! `BpTree` marking which rows are currently null.

use crate::btree::BpTree;
use crate::error::{SchemaError, StorageError};
use crate::file::{Ref, Storage};
use crate::spec::Types;
use std::collections::BTreeMap;

/// A column's position within its table's `Spec`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnKey(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Bool(bool),
    DateTime(i64),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    ObjectId([u8; 12]),
    Uuid([u8; 16]),
    Decimal128([u8; 16]),
    Link(u64),
    Mixed(MixedValue),
}

/// The value carried by a `Mixed` column cell: a type tag plus payload,
/// stored together in one blob since a mixed column has no fixed width
/// to hang a separate type-tag array off of.
#[derive(Clone, Debug, PartialEq)]
pub enum MixedValue {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    ObjectId([u8; 12]),
    Uuid([u8; 16]),
    Decimal128([u8; 16]),
    Link { target_table: String, row: u64 },
}

mod mixed_tag {
    pub const NULL: u8 = 0;
    pub const INT: u8 = 1;
    pub const BOOL: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BINARY: u8 = 6;
    pub const OBJECT_ID: u8 = 7;
    pub const UUID: u8 = 8;
    pub const DECIMAL128: u8 = 9;
    pub const LINK: u8 = 10;
}

fn encode_mixed(v: &MixedValue) -> Vec<u8> {
    let mut out = Vec::new();
    match v {
        MixedValue::Null => out.push(mixed_tag::NULL),
        MixedValue::Int(i) => {
            out.push(mixed_tag::INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        MixedValue::Bool(b) => {
            out.push(mixed_tag::BOOL);
            out.push(*b as u8);
        }
        MixedValue::Float(f) => {
            out.push(mixed_tag::FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        MixedValue::Double(d) => {
            out.push(mixed_tag::DOUBLE);
            out.extend_from_slice(&d.to_le_bytes());
        }
        MixedValue::String(s) => {
            out.push(mixed_tag::STRING);
            out.extend_from_slice(s.as_bytes());
        }
        MixedValue::Binary(b) => {
            out.push(mixed_tag::BINARY);
            out.extend_from_slice(b);
        }
        MixedValue::ObjectId(id) => {
            out.push(mixed_tag::OBJECT_ID);
            out.extend_from_slice(id);
        }
        MixedValue::Uuid(u) => {
            out.push(mixed_tag::UUID);
            out.extend_from_slice(u);
        }
        MixedValue::Decimal128(d) => {
            out.push(mixed_tag::DECIMAL128);
            out.extend_from_slice(d);
        }
        MixedValue::Link { target_table, row } => {
            out.push(mixed_tag::LINK);
            out.extend_from_slice(&(target_table.len() as u32).to_le_bytes());
            out.extend_from_slice(target_table.as_bytes());
            out.extend_from_slice(&row.to_le_bytes());
        }
    }
    out
}

fn decode_mixed(bytes: &[u8]) -> Result<MixedValue, StorageError> {
    let bad = || StorageError::Corruption("truncated mixed value".into());
    let tag = *bytes.first().ok_or_else(bad)?;
    let rest = &bytes[1..];
    Ok(match tag {
        mixed_tag::NULL => MixedValue::Null,
        mixed_tag::INT => MixedValue::Int(i64::from_le_bytes(rest.try_into().map_err(|_| bad())?)),
        mixed_tag::BOOL => MixedValue::Bool(*rest.first().ok_or_else(bad)? != 0),
        mixed_tag::FLOAT => MixedValue::Float(f32::from_le_bytes(rest.try_into().map_err(|_| bad())?)),
        mixed_tag::DOUBLE => MixedValue::Double(f64::from_le_bytes(rest.try_into().map_err(|_| bad())?)),
        mixed_tag::STRING => MixedValue::String(String::from_utf8(rest.to_vec()).map_err(|_| bad())?),
        mixed_tag::BINARY => MixedValue::Binary(rest.to_vec()),
        mixed_tag::OBJECT_ID => MixedValue::ObjectId(rest.try_into().map_err(|_| bad())?),
        mixed_tag::UUID => MixedValue::Uuid(rest.try_into().map_err(|_| bad())?),
        mixed_tag::DECIMAL128 => MixedValue::Decimal128(rest.try_into().map_err(|_| bad())?),
        mixed_tag::LINK => {
            if rest.len() < 4 {
                return Err(bad());
            }
            let name_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
            if rest.len() < 4 + name_len + 8 {
                return Err(bad());
            }
            let target_table = String::from_utf8(rest[4..4 + name_len].to_vec()).map_err(|_| bad())?;
            let row = u64::from_le_bytes(rest[4 + name_len..4 + name_len + 8].try_into().unwrap());
            MixedValue::Link { target_table, row }
        }
        other => return Err(StorageError::Corruption(format!("bad mixed tag {other}"))),
    })
}

fn is_blob_backed(t: &Types) -> bool {
    matches!(
        t,
        Types::String | Types::Binary | Types::ObjectId | Types::Uuid | Types::Decimal128 | Types::Mixed
    )
}

/// A search index over one column's values. The real format backs
/// this with its own B+-tree of sorted keys (see `table.cpp`'s
/// `search_index` ref); this crate models the same key -> one-or-many
/// row mapping as an in-memory `BTreeMap`, which is the idiomatic
/// analogue while still enforcing uniqueness and supporting lookup.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Null,
    Int(i64),
    Bool(bool),
    String(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexEntry {
    One(u64),
    Many(Vec<u64>),
}

#[derive(Clone, Default)]
pub struct Index {
    map: BTreeMap<IndexKey, IndexEntry>,
}

enum RemoveAction {
    Delete,
    Collapse(u64),
    None,
}

impl Index {
    pub fn new() -> Index {
        Index::default()
    }

    pub fn insert(&mut self, key: IndexKey, row: u64) {
        match self.map.get_mut(&key) {
            Some(IndexEntry::One(existing)) => {
                let existing = *existing;
                self.map.insert(key, IndexEntry::Many(vec![existing, row]));
            }
            Some(IndexEntry::Many(rows)) => rows.push(row),
            None => {
                self.map.insert(key, IndexEntry::One(row));
            }
        }
    }

    pub fn remove(&mut self, key: &IndexKey, row: u64) {
        let action = match self.map.get_mut(key) {
            None => return,
            Some(IndexEntry::One(r)) if *r == row => RemoveAction::Delete,
            Some(IndexEntry::One(_)) => RemoveAction::None,
            Some(IndexEntry::Many(rows)) => {
                rows.retain(|&r| r != row);
                match rows.len() {
                    0 => RemoveAction::Delete,
                    1 => RemoveAction::Collapse(rows[0]),
                    _ => RemoveAction::None,
                }
            }
        };
        match action {
            RemoveAction::Delete => {
                self.map.remove(key);
            }
            RemoveAction::Collapse(only) => {
                self.map.insert(key.clone(), IndexEntry::One(only));
            }
            RemoveAction::None => {}
        }
    }

    pub fn find(&self, key: &IndexKey) -> Option<&IndexEntry> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        self.map.contains_key(key)
    }

    /// Every row after an erased position shifts down by one in the
    /// underlying `BpTree` (see `Column::remove_row`); every stored row
    /// number past `erased` has to shift down with it or lookups drift
    /// out of sync with the data one erase at a time.
    fn shift_down_after(&mut self, erased: u64) {
        for entry in self.map.values_mut() {
            match entry {
                IndexEntry::One(r) if *r > erased => *r -= 1,
                IndexEntry::Many(rows) => {
                    for r in rows.iter_mut() {
                        if *r > erased {
                            *r -= 1;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn index_key_for(t: &Types, value: &ColumnValue) -> Option<IndexKey> {
    match (t, value) {
        (_, ColumnValue::Null) => Some(IndexKey::Null),
        (Types::Int, ColumnValue::Int(i)) => Some(IndexKey::Int(*i)),
        (Types::Bool, ColumnValue::Bool(b)) => Some(IndexKey::Bool(*b)),
        (Types::String, ColumnValue::String(s)) => Some(IndexKey::String(s.clone())),
        (Types::Link(_), ColumnValue::Link(r)) => Some(IndexKey::Int(*r as i64)),
        _ => None,
    }
}

/// Cheap to clone: `values`/`nulls` are just root refs, and mutating a
/// clone never disturbs the original's nodes (see `BpTree`). A
/// transaction snapshot clones the whole `Group` this way instead of
/// serializing it.
#[derive(Clone)]
pub struct Column {
    pub col_type: Types,
    pub nullable: bool,
    values: BpTree,
    nulls: Option<BpTree>,
    pub index: Option<Index>,
}

impl Column {
    pub fn create<S: Storage>(storage: &mut S, col_type: Types, nullable: bool) -> Result<Column, StorageError> {
        let values = BpTree::create(storage)?;
        let nulls = if nullable { Some(BpTree::create(storage)?) } else { None };
        Ok(Column { col_type, nullable, values, nulls, index: None })
    }

    pub fn len<S: Storage>(&self, storage: &S) -> Result<usize, StorageError> {
        self.values.len(storage)
    }

    pub fn create_index(&mut self) {
        self.index = Some(Index::new());
    }

    /// This column's row-data root ref, for `Table::encode_refs` to
    /// anchor into a real top-ref at commit time.
    pub fn values_root(&self) -> Ref {
        self.values.root()
    }

    /// This column's null-bitmap root ref, if nullable.
    pub fn nulls_root(&self) -> Option<Ref> {
        self.nulls.as_ref().map(|t| t.root())
    }

    /// Appends a fresh, null (if nullable) or zero-valued row at `index`.
    pub fn insert_row<S: Storage>(&mut self, storage: &mut S, index: usize) -> Result<(), StorageError> {
        self.values.insert(storage, index, 0)?;
        if let Some(nulls) = &mut self.nulls {
            nulls.insert(storage, index, 1)?;
        }
        Ok(())
    }

    pub fn remove_row<S: Storage>(&mut self, storage: &mut S, index: usize) -> Result<(), StorageError> {
        let old_key = if self.index.is_some() {
            let old_value = self.get(&*storage, index)?;
            index_key_for(&self.col_type, &old_value)
        } else {
            None
        };
        let slot = self.values.erase(storage, index)?;
        if let Some(nulls) = &mut self.nulls {
            nulls.erase(storage, index)?;
        }
        if is_blob_backed(&self.col_type) && slot != 0 {
            Storage::free(storage, Ref(slot as u64));
        }
        if let (Some(index_map), Some(key)) = (&mut self.index, old_key) {
            index_map.remove(&key, index as u64);
            index_map.shift_down_after(index as u64);
        }
        Ok(())
    }

    fn is_null_at<S: Storage>(&self, storage: &S, row: usize) -> Result<bool, StorageError> {
        match &self.nulls {
            Some(nulls) => Ok(nulls.get(storage, row)? != 0),
            None => Ok(false),
        }
    }

    pub fn get<S: Storage>(&self, storage: &S, row: usize) -> Result<ColumnValue, StorageError> {
        if self.is_null_at(storage, row)? {
            return Ok(ColumnValue::Null);
        }
        let slot = self.values.get(storage, row)?;
        Ok(match &self.col_type {
            Types::Int => ColumnValue::Int(slot),
            Types::Bool => ColumnValue::Bool(slot != 0),
            Types::DateTime => ColumnValue::DateTime(slot),
            Types::Float => ColumnValue::Float(f32::from_bits(slot as u32)),
            Types::Double => ColumnValue::Double(f64::from_bits(slot as u64)),
            Types::Link(_) => ColumnValue::Link(slot as u64),
            Types::String => ColumnValue::String(self.read_blob_string(storage, slot)?),
            Types::Binary => ColumnValue::Binary(self.read_blob(storage, slot)?),
            Types::ObjectId => ColumnValue::ObjectId(self.read_blob_fixed(storage, slot)?),
            Types::Uuid => ColumnValue::Uuid(self.read_blob_fixed(storage, slot)?),
            Types::Decimal128 => ColumnValue::Decimal128(self.read_blob_fixed(storage, slot)?),
            Types::Mixed => ColumnValue::Mixed(decode_mixed(&self.read_blob(storage, slot)?)?),
            Types::Table(_) | Types::LinkingObjects { .. } => {
                return Err(StorageError::Corruption(
                    "Table/LinkingObjects columns have no row slot".into(),
                ))
            }
        })
    }

    fn read_blob<S: Storage>(&self, storage: &S, slot: i64) -> Result<Vec<u8>, StorageError> {
        if slot == 0 {
            return Ok(Vec::new());
        }
        Ok(storage.read(Ref(slot as u64))?.to_vec())
    }

    fn read_blob_string<S: Storage>(&self, storage: &S, slot: i64) -> Result<String, StorageError> {
        String::from_utf8(self.read_blob(storage, slot)?)
            .map_err(|e| StorageError::Corruption(e.to_string()))
    }

    fn read_blob_fixed<S: Storage, const N: usize>(&self, storage: &S, slot: i64) -> Result<[u8; N], StorageError> {
        let bytes = self.read_blob(storage, slot)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Corruption("fixed-size blob had the wrong length".into()))
    }

    pub fn set<S: Storage>(&mut self, storage: &mut S, row: usize, value: ColumnValue) -> Result<(), SchemaError> {
        if !self.nullable && matches!(value, ColumnValue::Null) {
            return Err(SchemaError::SchemaMismatch("column is not nullable".into()));
        }
        let old_key = if self.index.is_some() {
            let old_value = self.get(&*storage, row).map_err(storage_err)?;
            index_key_for(&self.col_type, &old_value)
        } else {
            None
        };
        self.free_old_blob(storage, row).map_err(storage_err)?;
        if matches!(value, ColumnValue::Null) {
            self.values.set(storage, row, 0).map_err(storage_err)?;
            if let Some(nulls) = &mut self.nulls {
                nulls.set(storage, row, 1).map_err(storage_err)?;
            }
            self.retract_and_insert(row, old_key, None);
            return Ok(());
        }
        let slot = self.encode_slot(storage, &value).map_err(storage_err)?;
        self.values.set(storage, row, slot).map_err(storage_err)?;
        if let Some(nulls) = &mut self.nulls {
            nulls.set(storage, row, 0).map_err(storage_err)?;
        }
        let new_key = index_key_for(&self.col_type, &value);
        self.retract_and_insert(row, old_key, new_key);
        Ok(())
    }

    fn retract_and_insert(&mut self, row: usize, old_key: Option<IndexKey>, new_key: Option<IndexKey>) {
        if let Some(index) = &mut self.index {
            if let Some(old_key) = old_key {
                index.remove(&old_key, row as u64);
            }
            if let Some(new_key) = new_key {
                index.insert(new_key, row as u64);
            }
        }
    }

    fn free_old_blob<S: Storage>(&self, storage: &mut S, row: usize) -> Result<(), StorageError> {
        if !is_blob_backed(&self.col_type) {
            return Ok(());
        }
        let old = self.values.get(storage, row)?;
        if old != 0 {
            Storage::free(storage, Ref(old as u64));
        }
        Ok(())
    }

    fn encode_slot<S: Storage>(&self, storage: &mut S, value: &ColumnValue) -> Result<i64, StorageError> {
        let type_err = || StorageError::Corruption("value does not match column type".into());
        Ok(match (&self.col_type, value) {
            (Types::Int, ColumnValue::Int(i)) => *i,
            (Types::Bool, ColumnValue::Bool(b)) => *b as i64,
            (Types::DateTime, ColumnValue::DateTime(t)) => *t,
            (Types::Float, ColumnValue::Float(f)) => f.to_bits() as i64,
            (Types::Double, ColumnValue::Double(d)) => d.to_bits() as i64,
            (Types::Link(_), ColumnValue::Link(r)) => *r as i64,
            (Types::String, ColumnValue::String(s)) => Storage::alloc(storage, s.as_bytes())?.0 as i64,
            (Types::Binary, ColumnValue::Binary(b)) => Storage::alloc(storage, b)?.0 as i64,
            (Types::ObjectId, ColumnValue::ObjectId(id)) => Storage::alloc(storage, id)?.0 as i64,
            (Types::Uuid, ColumnValue::Uuid(u)) => Storage::alloc(storage, u)?.0 as i64,
            (Types::Decimal128, ColumnValue::Decimal128(d)) => Storage::alloc(storage, d)?.0 as i64,
            (Types::Mixed, ColumnValue::Mixed(m)) => Storage::alloc(storage, &encode_mixed(m))?.0 as i64,
            _ => return Err(type_err()),
        })
    }

}

fn storage_err(e: StorageError) -> SchemaError {
    SchemaError::SchemaMismatch(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Allocator;
    use tempfile::tempdir;

    fn new_allocator() -> (tempfile::TempDir, Allocator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.realm");
        let a = Allocator::create(&path).unwrap();
        (dir, a)
    }

    #[test]
    fn int_column_round_trips_and_supports_null() {
        let (_dir, mut a) = new_allocator();
        let mut col = Column::create(&mut a, Types::Int, true).unwrap();
        col.insert_row(&mut a, 0).unwrap();
        assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::Null);
        col.set(&mut a, 0, ColumnValue::Int(42)).unwrap();
        assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::Int(42));
        col.set(&mut a, 0, ColumnValue::Null).unwrap();
        assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::Null);
    }

    #[test]
    fn non_nullable_column_rejects_null() {
        let (_dir, mut a) = new_allocator();
        let mut col = Column::create(&mut a, Types::Int, false).unwrap();
        col.insert_row(&mut a, 0).unwrap();
        assert!(col.set(&mut a, 0, ColumnValue::Null).is_err());
    }

    #[test]
    fn string_column_blob_round_trip() {
        let (_dir, mut a) = new_allocator();
        let mut col = Column::create(&mut a, Types::String, false).unwrap();
        col.insert_row(&mut a, 0).unwrap();
        col.set(&mut a, 0, ColumnValue::String("hello".into())).unwrap();
        assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::String("hello".into()));
        col.set(&mut a, 0, ColumnValue::String("goodbye".into())).unwrap();
        assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::String("goodbye".into()));
    }

    #[test]
    fn mixed_column_round_trips_every_variant() {
        let (_dir, mut a) = new_allocator();
        let mut col = Column::create(&mut a, Types::Mixed, true).unwrap();
        col.insert_row(&mut a, 0).unwrap();
        for v in [
            MixedValue::Int(7),
            MixedValue::String("x".into()),
            MixedValue::Link { target_table: "Person".into(), row: 3 },
            MixedValue::Null,
        ] {
            col.set(&mut a, 0, ColumnValue::Mixed(v.clone())).unwrap();
            assert_eq!(col.get(&a, 0).unwrap(), ColumnValue::Mixed(v));
        }
    }

    #[test]
    fn indexed_string_column_tracks_duplicates() {
        let (_dir, mut a) = new_allocator();
        let mut col = Column::create(&mut a, Types::String, false).unwrap();
        col.create_index();
        for i in 0..3 {
            col.insert_row(&mut a, i).unwrap();
            col.set(&mut a, i, ColumnValue::String("dup".into())).unwrap();
        }
        let entry = col.index.as_ref().unwrap().find(&IndexKey::String("dup".into())).unwrap();
        assert_eq!(entry, &IndexEntry::Many(vec![0, 1, 2]));
        col.remove_row(&mut a, 1).unwrap();
        let entry = col.index.as_ref().unwrap().find(&IndexKey::String("dup".into())).unwrap();
        assert_eq!(entry, &IndexEntry::Many(vec![0, 1]));
    }
}
