//! A `Table` pairs a `Spec` (the schema) with one `Column` per spec
//! entry, all sharing the same row index space. Rows are addressed by
//! plain position; `move_last_over` is the unordered O(1)-ish removal
//! every sync-aware deletion in this crate actually uses, since
//! preserving row order across a delete would mean shifting every
//! column's B+-tree past the hole.

use crate::array::Array;
use crate::column::{Column, ColumnValue};
use crate::error::{CoreError, CoreResult, SchemaError, StorageError};
use crate::file::{Ref, Storage};
use crate::spec::{ColumnDef, Spec};

/// Above this many distinct values, `Table::optimize` leaves a string
/// column as-is rather than building a dictionary for it.
pub const STRING_ENUM_THRESHOLD: usize = 128;

/// Cheap to clone (see `Column`): a `Group` snapshot for a transaction
/// clones every `Table` it holds without copying any B+-tree node.
#[derive(Clone)]
pub struct Table {
    pub name: String,
    pub spec: Spec,
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Table {
        Table {
            name: name.into(),
            spec: Spec::new(),
            columns: Vec::new(),
            row_count: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_value_type(&self, col: usize) -> Option<&crate::spec::Types> {
        self.spec.column(col).map(|c| &c.col_type)
    }

    pub fn add_column<S: Storage>(&mut self, storage: &mut S, def: ColumnDef) -> CoreResult<usize> {
        let nullable = def.is_nullable();
        let col_type = def.col_type.clone();
        let idx = self.spec.add_column(def).map_err(CoreError::Schema)?;
        let mut col = Column::create(storage, col_type, nullable).map_err(CoreError::Storage)?;
        if def_needs_index(&self.spec, idx) {
            col.create_index();
        }
        for row in 0..self.row_count {
            col.insert_row(storage, row).map_err(CoreError::Storage)?;
        }
        self.columns.insert(idx, col);
        Ok(idx)
    }

    pub fn remove_column<S: Storage>(&mut self, storage: &mut S, idx: usize) -> CoreResult<()> {
        for row in (0..self.row_count).rev() {
            self.columns[idx].remove_row(storage, row).map_err(CoreError::Storage)?;
        }
        self.spec.remove_column(idx).map_err(CoreError::Schema)?;
        self.columns.remove(idx);
        Ok(())
    }

    pub fn rename_column(&mut self, idx: usize, new_name: impl Into<String>) -> CoreResult<()> {
        self.spec.rename_column(idx, new_name).map_err(CoreError::Schema)
    }

    pub fn insert_row<S: Storage>(&mut self, storage: &mut S) -> CoreResult<usize> {
        let row = self.row_count;
        for col in &mut self.columns {
            col.insert_row(storage, row).map_err(CoreError::Storage)?;
        }
        self.row_count += 1;
        Ok(row)
    }

    /// Removes row `row`, shifting every later row down by one to keep
    /// row order stable. O(n) in the number of rows after it.
    pub fn remove_row<S: Storage>(&mut self, storage: &mut S, row: usize) -> CoreResult<()> {
        if row >= self.row_count {
            return Err(CoreError::Storage(crate::error::StorageError::IndexOutOfBounds {
                index: row,
                size: self.row_count,
            }));
        }
        for col in &mut self.columns {
            col.remove_row(storage, row).map_err(CoreError::Storage)?;
        }
        self.row_count -= 1;
        Ok(())
    }

    /// Removes row `row` by overwriting it with the last row's values
    /// and then popping the last row, leaving every other row's
    /// position unchanged. Cheaper than `remove_row` but does not
    /// preserve order.
    pub fn move_last_over<S: Storage>(&mut self, storage: &mut S, row: usize) -> CoreResult<()> {
        if row >= self.row_count {
            return Err(CoreError::Storage(crate::error::StorageError::IndexOutOfBounds {
                index: row,
                size: self.row_count,
            }));
        }
        let last = self.row_count - 1;
        if row != last {
            for col in &mut self.columns {
                let v = col.get(storage, last).map_err(CoreError::Storage)?;
                col.set(storage, row, v).map_err(CoreError::Schema)?;
            }
        }
        for col in &mut self.columns {
            col.remove_row(storage, last).map_err(CoreError::Storage)?;
        }
        self.row_count -= 1;
        Ok(())
    }

    pub fn get<S: Storage>(&self, storage: &S, row: usize, col: usize) -> CoreResult<ColumnValue> {
        let column = self
            .columns
            .get(col)
            .ok_or_else(|| CoreError::Schema(SchemaError::InvalidColumnKey(format!("no column {col}"))))?;
        column.get(storage, row).map_err(CoreError::Storage)
    }

    pub fn set<S: Storage>(&mut self, storage: &mut S, row: usize, col: usize, value: ColumnValue) -> CoreResult<()> {
        let column = self
            .columns
            .get_mut(col)
            .ok_or_else(|| CoreError::Schema(SchemaError::InvalidColumnKey(format!("no column {col}"))))?;
        column.set(storage, row, value).map_err(CoreError::Schema)
    }

    /// Packs every column's `values`/`nulls` root ref into a has-refs
    /// array and allocates it, giving `Group::encode` a single ref that
    /// anchors this table's on-disk state for the top-ref.
    pub fn encode_refs<S: Storage>(&self, storage: &mut S) -> Result<Ref, StorageError> {
        let mut refs = Array::new();
        refs.has_refs = true;
        for col in &self.columns {
            refs.push(col.values_root().0 as i64);
            refs.push(col.nulls_root().map(|r| r.0).unwrap_or(0) as i64);
        }
        storage.alloc(&refs.encode(0)?)
    }

    pub fn create_index<S: Storage>(&mut self, storage: &mut S, col: usize) -> CoreResult<()> {
        let column = self
            .columns
            .get_mut(col)
            .ok_or_else(|| CoreError::Schema(SchemaError::InvalidColumnKey(format!("no column {col}"))))?;
        if column.index.is_none() {
            column.create_index();
            for row in 0..self.row_count {
                let v = column.get(storage, row).map_err(CoreError::Storage)?;
                // re-`set` the current value purely to feed it through
                // the index-maintenance path now that one exists.
                column.set(storage, row, v).map_err(CoreError::Schema)?;
            }
        }
        Ok(())
    }

    /// Rewrites every `String`-typed column's distinct value set into
    /// the spec's dictionary once it's small relative to the row
    /// count, so readers that care (e.g. a future `optimize`-aware
    /// encoder) can special-case it. This crate's `Column::get`/`set`
    /// already stores full strings regardless, so this is schema
    /// bookkeeping only: it doesn't change how values round-trip.
    pub fn optimize<S: Storage>(&mut self, storage: &S) -> CoreResult<()> {
        for (idx, def) in self.spec.columns().to_vec().iter().enumerate() {
            if def.col_type != crate::spec::Types::String {
                continue;
            }
            let column = &self.columns[idx];
            let mut distinct = std::collections::BTreeSet::new();
            let mut too_many = false;
            for row in 0..self.row_count {
                if let ColumnValue::String(s) = column.get(storage, row).map_err(CoreError::Storage)? {
                    distinct.insert(s);
                    if distinct.len() > STRING_ENUM_THRESHOLD {
                        too_many = true;
                        break;
                    }
                }
            }
            if too_many {
                self.spec.clear_string_enum(&def.name);
            } else {
                self.spec.set_string_enum(&def.name, distinct.into_iter().collect());
            }
        }
        Ok(())
    }
}

fn def_needs_index(spec: &Spec, idx: usize) -> bool {
    spec.column(idx)
        .map(|c| c.attrs.contains(&crate::spec::Attr::Indexed) || c.is_primary_key())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Allocator;
    use crate::spec::{Attr, Types};
    use tempfile::tempdir;

    fn new_allocator() -> (tempfile::TempDir, Allocator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.realm");
        let a = Allocator::create(&path).unwrap();
        (dir, a)
    }

    #[test]
    fn insert_get_set_round_trip() {
        let (_dir, mut a) = new_allocator();
        let mut table = Table::new("Person");
        table.add_column(&mut a, ColumnDef::new("name", Types::String)).unwrap();
        table.add_column(&mut a, ColumnDef::new("age", Types::Int)).unwrap();

        let row = table.insert_row(&mut a).unwrap();
        table.set(&mut a, row, 0, ColumnValue::String("Ada".into())).unwrap();
        table.set(&mut a, row, 1, ColumnValue::Int(30)).unwrap();

        assert_eq!(table.get(&a, row, 0).unwrap(), ColumnValue::String("Ada".into()));
        assert_eq!(table.get(&a, row, 1).unwrap(), ColumnValue::Int(30));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn move_last_over_swaps_in_last_row() {
        let (_dir, mut a) = new_allocator();
        let mut table = Table::new("T");
        table.add_column(&mut a, ColumnDef::new("v", Types::Int)).unwrap();
        for i in 0..5 {
            let row = table.insert_row(&mut a).unwrap();
            table.set(&mut a, row, 0, ColumnValue::Int(i)).unwrap();
        }
        table.move_last_over(&mut a, 1).unwrap();
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.get(&a, 1, 0).unwrap(), ColumnValue::Int(4));
        assert_eq!(table.get(&a, 0, 0).unwrap(), ColumnValue::Int(0));
        assert_eq!(table.get(&a, 2, 0).unwrap(), ColumnValue::Int(2));
    }

    #[test]
    fn adding_column_after_rows_exist_backfills_every_row() {
        let (_dir, mut a) = new_allocator();
        let mut table = Table::new("T");
        for _ in 0..3 {
            table.insert_row(&mut a).unwrap();
        }
        table.add_column(&mut a, ColumnDef::new("n", Types::Int).with_attr(Attr::Nullable)).unwrap();
        for row in 0..3 {
            assert_eq!(table.get(&a, row, 0).unwrap(), ColumnValue::Null);
        }
    }

    #[test]
    fn optimize_builds_dictionary_for_low_cardinality_column() {
        let (_dir, mut a) = new_allocator();
        let mut table = Table::new("T");
        table.add_column(&mut a, ColumnDef::new("status", Types::String)).unwrap();
        for s in ["open", "closed", "open", "open"] {
            let row = table.insert_row(&mut a).unwrap();
            table.set(&mut a, row, 0, ColumnValue::String(s.into())).unwrap();
        }
        table.optimize(&a).unwrap();
        let mut values = table.spec.string_enum("status").unwrap().to_vec();
        values.sort();
        assert_eq!(values, vec!["closed".to_string(), "open".to_string()]);
    }
}
