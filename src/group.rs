//! `Group`: the named collection of tables held by one version of a
//! realm file. Where `file.rs`'s `Allocator` manages raw refs and
//! `table.rs`'s `Table` manages one table's rows and columns, `Group`
//! is the directory between them — table name to `Table` — and the
//! place a table rename or removal propagates out to every other
//! table's `Link`/`LinkingObjects` columns.

use crate::array::Array;
use crate::error::{CoreError, CoreResult, SchemaError, StorageError};
use crate::file::{Ref, Storage};
use crate::table::Table;

/// Cheap to clone: see `Table`/`Column`. `Transaction::begin_write`
/// clones the current `Group` into its working copy; mutations during
/// the transaction allocate fresh nodes, so the pre-transaction clone
/// (if a reader is still holding it) keeps reading intact old data.
#[derive(Clone, Default)]
pub struct Group {
    tables: Vec<Table>,
}

impl Group {
    pub fn new() -> Group {
        Group::default()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn add_table(&mut self, name: impl Into<String>) -> CoreResult<&mut Table> {
        let name = name.into();
        if self.table_index(&name).is_some() {
            return Err(CoreError::Schema(SchemaError::SchemaMismatch(format!(
                "table {name:?} already exists"
            ))));
        }
        self.tables.push(Table::new(name));
        Ok(self.tables.last_mut().unwrap())
    }

    /// Empties then drops a table. Rows are removed via
    /// `move_last_over` so blob-backed columns release their blob refs
    /// through the same path row deletion always uses.
    pub fn remove_table<S: Storage>(&mut self, storage: &mut S, name: &str) -> CoreResult<()> {
        let idx = self.table_index(name).ok_or_else(|| {
            CoreError::Schema(SchemaError::SchemaMismatch(format!("no table {name:?}")))
        })?;
        while self.tables[idx].row_count() > 0 {
            self.tables[idx].move_last_over(storage, 0)?;
        }
        self.tables.remove(idx);
        Ok(())
    }

    pub fn rename_table(&mut self, old_name: &str, new_name: &str) -> CoreResult<()> {
        if self.table_index(new_name).is_some() {
            return Err(CoreError::Schema(SchemaError::SchemaMismatch(format!(
                "table {new_name:?} already exists"
            ))));
        }
        let idx = self.table_index(old_name).ok_or_else(|| {
            CoreError::Schema(SchemaError::SchemaMismatch(format!("no table {old_name:?}")))
        })?;
        self.tables[idx].name = new_name.to_string();
        for t in &mut self.tables {
            t.spec.rename_referenced_table(old_name, new_name);
        }
        Ok(())
    }

    /// Builds the real top-ref a commit publishes: a has-refs array of
    /// per-table refs (`Table::encode_refs`), each in turn anchoring
    /// that table's columns' on-disk roots. `WriteTransaction::commit`
    /// passes the result to `Allocator::commit` so the version it
    /// publishes actually refers to every array and blob this
    /// transaction touched, not a placeholder.
    pub fn encode<S: Storage>(&self, storage: &mut S) -> Result<Ref, StorageError> {
        let mut table_refs = Array::new();
        table_refs.has_refs = true;
        for table in &self.tables {
            let table_ref = table.encode_refs(storage)?;
            table_refs.push(table_ref.0 as i64);
        }
        storage.alloc(&table_refs.encode(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Allocator;
    use crate::spec::{ColumnDef, Types};
    use tempfile::tempdir;

    fn new_allocator() -> (tempfile::TempDir, Allocator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.realm");
        let a = Allocator::create(&path).unwrap();
        (dir, a)
    }

    #[test]
    fn add_table_rejects_duplicate_name() {
        let mut group = Group::new();
        group.add_table("Person").unwrap();
        assert!(group.add_table("Person").is_err());
    }

    #[test]
    fn rename_table_propagates_into_other_tables_links() {
        let (_dir, mut a) = new_allocator();
        let mut group = Group::new();
        group.add_table("Person").unwrap();
        let comments = group.add_table("Comment").unwrap();
        comments
            .add_column(&mut a, ColumnDef::new("author", Types::Link("Person".into())))
            .unwrap();

        group.rename_table("Person", "User").unwrap();

        assert!(group.table("Person").is_none());
        assert!(group.table("User").is_some());
        let comment = group.table("Comment").unwrap();
        assert_eq!(
            comment.column_value_type(0),
            Some(&Types::Link("User".into()))
        );
    }

    #[test]
    fn remove_table_drains_rows_first() {
        let (_dir, mut a) = new_allocator();
        let mut group = Group::new();
        let t = group.add_table("T").unwrap();
        t.add_column(&mut a, ColumnDef::new("v", Types::Int)).unwrap();
        for _ in 0..3 {
            group.table_mut("T").unwrap().insert_row(&mut a).unwrap();
        }
        group.remove_table(&mut a, "T").unwrap();
        assert!(group.table("T").is_none());
    }
}
