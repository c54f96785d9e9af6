//! A table's schema: an ordered sequence of (name, type, attrs) column
//! descriptors, possibly nested (a `Table`-typed column carries its own
//! sub-`Spec`) or naming a small closed set of string enumerants for a
//! dictionary-backed string column.

use crate::error::SchemaError;
use std::collections::HashSet;

/// The logical type of a column. `Link`/`LinkingObjects` carry the
/// name of the target table rather than a resolved index, since specs
/// are built before the group they'll live in is known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Types {
    Int,
    Bool,
    DateTime,
    Float,
    Double,
    String,
    Binary,
    Table(Box<Spec>),
    Mixed,
    ObjectId,
    Uuid,
    Decimal128,
    Link(String),
    LinkingObjects { target_table: String, origin_column: String },
}

/// Per-column modifiers. A column may carry more than one, hence a set
/// rather than a single variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attr {
    Indexed,
    Nullable,
    PrimaryKey,
    FullTextIndexed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: Types,
    pub attrs: HashSet<Attr>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: Types) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            col_type,
            attrs: HashSet::new(),
        }
    }

    pub fn with_attr(mut self, attr: Attr) -> ColumnDef {
        self.attrs.insert(attr);
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.attrs.contains(&Attr::Nullable)
    }

    pub fn is_primary_key(&self) -> bool {
        self.attrs.contains(&Attr::PrimaryKey)
    }
}

/// An ordered sequence of column descriptors. Order is significant:
/// it's the column index space every `ColumnKey` indexes into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Spec {
    columns: Vec<ColumnDef>,
    /// A small closed vocabulary of strings shared by every row of an
    /// enum-backed string column, keyed by column name. Populated by
    /// `Table::optimize()` once a string column's distinct value count
    /// stays below the enumeration threshold.
    string_enums: std::collections::HashMap<String, Vec<String>>,
}

impl Spec {
    pub fn new() -> Spec {
        Spec::default()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn add_column(&mut self, column: ColumnDef) -> Result<usize, SchemaError> {
        if self.column_index(&column.name).is_some() {
            return Err(SchemaError::InvalidColumnKey(format!(
                "duplicate column name {:?}",
                column.name
            )));
        }
        if column.is_primary_key() && self.columns.iter().any(|c| c.is_primary_key()) {
            return Err(SchemaError::InvalidPrimaryKey(
                "a table may have at most one primary key column".into(),
            ));
        }
        self.columns.push(column);
        Ok(self.columns.len() - 1)
    }

    pub fn remove_column(&mut self, index: usize) -> Result<ColumnDef, SchemaError> {
        if index >= self.columns.len() {
            return Err(SchemaError::InvalidColumnKey(format!(
                "no column at index {index}"
            )));
        }
        let removed = self.columns.remove(index);
        self.string_enums.remove(&removed.name);
        Ok(removed)
    }

    pub fn rename_column(&mut self, index: usize, new_name: impl Into<String>) -> Result<(), SchemaError> {
        let new_name = new_name.into();
        if self.column_index(&new_name).is_some() {
            return Err(SchemaError::InvalidColumnKey(format!(
                "duplicate column name {new_name:?}"
            )));
        }
        let old_name = self
            .columns
            .get(index)
            .ok_or_else(|| SchemaError::InvalidColumnKey(format!("no column at index {index}")))?
            .name
            .clone();
        self.columns[index].name = new_name.clone();
        if let Some(enums) = self.string_enums.remove(&old_name) {
            self.string_enums.insert(new_name, enums);
        }
        Ok(())
    }

    pub fn set_string_enum(&mut self, column_name: &str, values: Vec<String>) {
        self.string_enums.insert(column_name.to_string(), values);
    }

    pub fn string_enum(&self, column_name: &str) -> Option<&[String]> {
        self.string_enums.get(column_name).map(|v| v.as_slice())
    }

    pub fn clear_string_enum(&mut self, column_name: &str) {
        self.string_enums.remove(column_name);
    }

    /// Recursively walks every nested `Spec` owned by a `Table`-typed
    /// column, depth-first. Used when a schema change (e.g. renaming a
    /// linked table) must propagate into subtable specs.
    pub fn for_each_nested_mut(&mut self, f: &mut impl FnMut(&mut Spec)) {
        for col in &mut self.columns {
            if let Types::Table(nested) = &mut col.col_type {
                f(nested);
                nested.for_each_nested_mut(f);
            }
        }
    }

    /// Rewrites every `Link`/`LinkingObjects` reference to `old_name`
    /// into `new_name`, at this level and in every nested subtable
    /// spec. A table rename elsewhere in the same group must propagate
    /// here or those columns would point at a table that no longer
    /// exists under that name.
    pub fn rename_referenced_table(&mut self, old_name: &str, new_name: &str) {
        for col in &mut self.columns {
            match &mut col.col_type {
                Types::Link(target) if target == old_name => *target = new_name.to_string(),
                Types::LinkingObjects { target_table, .. } if target_table == old_name => {
                    *target_table = new_name.to_string();
                }
                Types::Table(nested) => nested.rename_referenced_table(old_name, new_name),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_column_rejects_duplicate_names_and_second_primary_key() {
        let mut spec = Spec::new();
        spec.add_column(ColumnDef::new("id", Types::Int).with_attr(Attr::PrimaryKey))
            .unwrap();
        assert!(spec.add_column(ColumnDef::new("id", Types::String)).is_err());
        assert!(spec
            .add_column(ColumnDef::new("other_id", Types::Int).with_attr(Attr::PrimaryKey))
            .is_err());
    }

    #[test]
    fn rename_column_carries_its_string_enum_along() {
        let mut spec = Spec::new();
        spec.add_column(ColumnDef::new("status", Types::String)).unwrap();
        spec.set_string_enum("status", vec!["open".into(), "closed".into()]);
        spec.rename_column(0, "state").unwrap();
        assert_eq!(spec.string_enum("status"), None);
        assert_eq!(spec.string_enum("state"), Some(&["open".to_string(), "closed".to_string()][..]));
    }

    #[test]
    fn rename_referenced_table_reaches_nested_specs() {
        let mut inner = Spec::new();
        inner.add_column(ColumnDef::new("author", Types::Link("Person".into()))).unwrap();
        let mut outer = Spec::new();
        outer.add_column(ColumnDef::new("owner", Types::Link("Person".into()))).unwrap();
        outer.add_column(ColumnDef::new("comments", Types::Table(Box::new(inner)))).unwrap();

        outer.rename_referenced_table("Person", "User");

        assert_eq!(outer.column(0).unwrap().col_type, Types::Link("User".into()));
        let Types::Table(nested) = &outer.column(1).unwrap().col_type else { panic!() };
        assert_eq!(nested.column(0).unwrap().col_type, Types::Link("User".into()));
    }

    #[test]
    fn nested_table_spec_is_visited() {
        let mut inner = Spec::new();
        inner.add_column(ColumnDef::new("x", Types::Int)).unwrap();
        let mut outer = Spec::new();
        outer.add_column(ColumnDef::new("nested", Types::Table(Box::new(inner)))).unwrap();

        let mut seen = 0;
        outer.for_each_nested_mut(&mut |_| seen += 1);
        assert_eq!(seen, 1);
    }
}
