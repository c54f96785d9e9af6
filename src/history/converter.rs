//! Inter-realm value converter (`object_converter.cpp` in the original):
//! makes one realm's collection equal another's with a minimal diff,
//! and resolves cross-realm link targets by primary key or row-key
//! identity, creating the destination object when it doesn't exist yet.

use crate::column::MixedValue;
use crate::error::SchemaError;
use std::cmp::Ordering;

/// Orders `MixedValue`s for `copy_set`'s merge walk. Cross-type
/// ordering is by variant position (arbitrary but stable); within a
/// type, `PartialOrd` is used and a `NaN` compares equal to itself
/// rather than panicking, since a well-ordered total order is all the
/// merge walk needs, not IEEE-754 semantics.
fn mixed_cmp(a: &MixedValue, b: &MixedValue) -> Ordering {
    fn rank(v: &MixedValue) -> u8 {
        match v {
            MixedValue::Null => 0,
            MixedValue::Bool(_) => 1,
            MixedValue::Int(_) => 2,
            MixedValue::Float(_) => 3,
            MixedValue::Double(_) => 4,
            MixedValue::String(_) => 5,
            MixedValue::Binary(_) => 6,
            MixedValue::ObjectId(_) => 7,
            MixedValue::Uuid(_) => 8,
            MixedValue::Decimal128(_) => 9,
            MixedValue::Link { .. } => 10,
        }
    }
    match (a, b) {
        (MixedValue::Null, MixedValue::Null) => Ordering::Equal,
        (MixedValue::Bool(x), MixedValue::Bool(y)) => x.cmp(y),
        (MixedValue::Int(x), MixedValue::Int(y)) => x.cmp(y),
        (MixedValue::Float(x), MixedValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (MixedValue::Double(x), MixedValue::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (MixedValue::String(x), MixedValue::String(y)) => x.cmp(y),
        (MixedValue::Binary(x), MixedValue::Binary(y)) => x.cmp(y),
        (MixedValue::ObjectId(x), MixedValue::ObjectId(y)) => x.cmp(y),
        (MixedValue::Uuid(x), MixedValue::Uuid(y)) => x.cmp(y),
        (MixedValue::Decimal128(x), MixedValue::Decimal128(y)) => x.cmp(y),
        (MixedValue::Link { target_table: tt, row: r }, MixedValue::Link { target_table: ot, row: or }) => {
            (tt, r).cmp(&(ot, or))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Makes `dst` equal `src` by replacing the shortest possible middle
/// range (longest common prefix/suffix on either side). Returns
/// whether `dst` was actually changed.
pub fn copy_list(src: &[MixedValue], dst: &mut Vec<MixedValue>) -> bool {
    if src == dst.as_slice() {
        return false;
    }
    let max_prefix = src.len().min(dst.len());
    let mut prefix = 0;
    while prefix < max_prefix && src[prefix] == dst[prefix] {
        prefix += 1;
    }
    let max_suffix = max_prefix - prefix;
    let mut suffix = 0;
    while suffix < max_suffix && src[src.len() - 1 - suffix] == dst[dst.len() - 1 - suffix] {
        suffix += 1;
    }
    let replace_range = prefix..(dst.len() - suffix);
    let replacement: Vec<MixedValue> = src[prefix..(src.len() - suffix)].to_vec();
    dst.splice(replace_range, replacement);
    true
}

/// Merge-walks sorted copies of `src`/`dst`, leaving `dst` containing
/// exactly `src`'s elements. Returns whether anything changed.
pub fn copy_set(src: &[MixedValue], dst: &mut Vec<MixedValue>) -> bool {
    let mut src_sorted = src.to_vec();
    src_sorted.sort_by(mixed_cmp);
    dst.sort_by(mixed_cmp);

    let mut merged = Vec::with_capacity(src_sorted.len());
    let mut changed = false;
    let (mut i, mut j) = (0, 0);
    loop {
        match (src_sorted.get(i), dst.get(j)) {
            (Some(s), Some(d)) => match mixed_cmp(s, d) {
                Ordering::Less => {
                    merged.push(s.clone());
                    i += 1;
                    changed = true;
                }
                Ordering::Greater => {
                    j += 1;
                    changed = true;
                }
                Ordering::Equal => {
                    merged.push(s.clone());
                    i += 1;
                    j += 1;
                }
            },
            (Some(s), None) => {
                merged.push(s.clone());
                i += 1;
                changed = true;
            }
            (None, Some(_)) => {
                j += 1;
                changed = true;
            }
            (None, None) => break,
        }
    }
    *dst = merged;
    changed
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictChange {
    Insert(String, MixedValue),
    Delete(String),
    Modify(String, MixedValue),
}

/// Merge-walks `src`/`dst` assuming both are already in ascending key
/// order, producing the insert/delete/modify list and leaving `dst`
/// equal to `src`.
pub fn copy_dictionary(src: &[(String, MixedValue)], dst: &mut Vec<(String, MixedValue)>) -> Vec<DictChange> {
    let mut changes = Vec::new();
    let mut merged = Vec::with_capacity(src.len());
    let (mut i, mut j) = (0, 0);
    loop {
        match (src.get(i), dst.get(j)) {
            (Some((sk, sv)), Some((dk, dv))) => match sk.cmp(dk) {
                Ordering::Less => {
                    changes.push(DictChange::Insert(sk.clone(), sv.clone()));
                    merged.push((sk.clone(), sv.clone()));
                    i += 1;
                }
                Ordering::Greater => {
                    changes.push(DictChange::Delete(dk.clone()));
                    j += 1;
                }
                Ordering::Equal => {
                    if sv != dv {
                        changes.push(DictChange::Modify(sk.clone(), sv.clone()));
                    }
                    merged.push((sk.clone(), sv.clone()));
                    i += 1;
                    j += 1;
                }
            },
            (Some((sk, sv)), None) => {
                changes.push(DictChange::Insert(sk.clone(), sv.clone()));
                merged.push((sk.clone(), sv.clone()));
                i += 1;
            }
            (None, Some((dk, _))) => {
                changes.push(DictChange::Delete(dk.clone()));
                j += 1;
            }
            (None, None) => break,
        }
    }
    *dst = merged;
    changes
}

/// How a source-realm link identifies its target object.
pub enum LinkKey {
    PrimaryKey(MixedValue),
    RowIndex(u64),
}

/// Destination-realm side of link resolution: looks a target object up
/// (by primary key or row-key identity, per the caller's choice of
/// `LinkKey`) and creates it if missing, or reports `Ok(None)` when the
/// target cannot be resolved because it has been deleted at the
/// destination (row-key identity can't invent a replacement the way a
/// primary-key lookup can create one). Implemented against a live
/// `Group`/`Table` elsewhere; the converter only needs this narrow seam
/// so its list/set/dict logic stays independent of storage.
pub trait LinkResolver {
    fn resolve_or_create(&mut self, target_table: &str, key: &LinkKey, embedded: bool) -> Result<Option<u64>, SchemaError>;
}

/// Resolves one Link value from the source realm into a destination
/// `MixedValue::Link`, creating the destination row if this is the
/// first time it's referenced. A single link field (unlike a list
/// element) can legally hold null, so a deleted target just resolves
/// to `MixedValue::Null` here.
pub fn copy_link(
    resolver: &mut impl LinkResolver,
    target_table: &str,
    key: LinkKey,
    embedded: bool,
) -> Result<MixedValue, SchemaError> {
    match resolver.resolve_or_create(target_table, &key, embedded)? {
        Some(row) => Ok(MixedValue::Link { target_table: target_table.to_string(), row }),
        None => Ok(MixedValue::Null),
    }
}

/// As `copy_list`, but resolves every `MixedValue::Link` element
/// against `resolver` first (row-key identity, since a list element
/// has no primary key of its own to look up by). A link whose target
/// has been deleted at the destination can't be written back as a
/// list element in place — lists don't support a null standing in for
/// a link — so that position is queued and erased from `dst` outright
/// once the diff settles, instead of being spliced in mid-diff. A
/// non-link `MixedValue::Null` in the source is left untouched: it was
/// never a link, so there is nothing that could have been deleted.
pub fn copy_list_with_links(
    src: &[MixedValue],
    dst: &mut Vec<MixedValue>,
    resolver: &mut impl LinkResolver,
) -> Result<bool, SchemaError> {
    let mut resolved = Vec::with_capacity(src.len());
    for v in src {
        match v {
            MixedValue::Link { target_table, row } => {
                match resolver.resolve_or_create(target_table, &LinkKey::RowIndex(*row), false)? {
                    Some(row) => resolved.push(MixedValue::Link { target_table: target_table.clone(), row }),
                    None => resolved.push(MixedValue::Null),
                }
            }
            other => resolved.push(other.clone()),
        }
    }
    let changed = copy_list(&resolved, dst);
    let mut erase_at: Vec<usize> = dst
        .iter()
        .enumerate()
        .filter(|(i, v)| matches!(v, MixedValue::Null) && matches!(src.get(*i), Some(MixedValue::Link { .. })))
        .map(|(i, _)| i)
        .collect();
    erase_at.sort_unstable_by(|a, b| b.cmp(a));
    for idx in erase_at {
        dst.remove(idx);
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> MixedValue {
        MixedValue::String(v.to_string())
    }

    #[test]
    fn copy_list_replaces_only_the_middle_range() {
        let src = vec![s("a"), s("b"), s("c"), s("d"), s("e")];
        let mut dst = vec![s("a"), s("x"), s("y"), s("d"), s("e")];
        let changed = copy_list(&src, &mut dst);
        assert!(changed);
        assert_eq!(dst, src);
    }

    #[test]
    fn copy_list_is_idempotent() {
        let src = vec![s("a"), s("b"), s("c")];
        let mut dst = vec![s("a"), s("x"), s("c")];
        assert!(copy_list(&src, &mut dst));
        assert!(!copy_list(&src, &mut dst), "second call must report no updates");
        assert_eq!(dst, src);
    }

    #[test]
    fn copy_set_adds_and_removes_to_match_source() {
        let src = vec![MixedValue::Int(1), MixedValue::Int(3), MixedValue::Int(5)];
        let mut dst = vec![MixedValue::Int(1), MixedValue::Int(2), MixedValue::Int(3)];
        let changed = copy_set(&src, &mut dst);
        assert!(changed);
        let mut want = src.clone();
        want.sort_by(mixed_cmp);
        assert_eq!(dst, want);
    }

    #[test]
    fn copy_dictionary_reports_insert_delete_modify() {
        let src = vec![
            ("a".to_string(), MixedValue::Int(1)),
            ("b".to_string(), MixedValue::Int(99)),
            ("d".to_string(), MixedValue::Int(4)),
        ];
        let mut dst = vec![
            ("a".to_string(), MixedValue::Int(1)),
            ("b".to_string(), MixedValue::Int(2)),
            ("c".to_string(), MixedValue::Int(3)),
        ];
        let changes = copy_dictionary(&src, &mut dst);
        assert_eq!(
            changes,
            vec![
                DictChange::Modify("b".to_string(), MixedValue::Int(99)),
                DictChange::Delete("c".to_string()),
                DictChange::Insert("d".to_string(), MixedValue::Int(4)),
            ]
        );
        assert_eq!(dst, src);
    }

    /// Resolves every row by adding a fixed offset, except row `13`,
    /// which stands in for a target that's been deleted at the
    /// destination.
    struct OffsetResolver {
        offset: u64,
    }

    impl LinkResolver for OffsetResolver {
        fn resolve_or_create(&mut self, _target_table: &str, key: &LinkKey, _embedded: bool) -> Result<Option<u64>, SchemaError> {
            match key {
                LinkKey::RowIndex(13) => Ok(None),
                LinkKey::RowIndex(row) => Ok(Some(row + self.offset)),
                LinkKey::PrimaryKey(_) => Ok(Some(0)),
            }
        }
    }

    fn link(row: u64) -> MixedValue {
        MixedValue::Link { target_table: "Person".to_string(), row }
    }

    #[test]
    fn copy_list_with_links_resolves_targets_through_the_row_offset() {
        let src = vec![link(1), link(2)];
        let mut dst = vec![];
        let mut resolver = OffsetResolver { offset: 100 };
        let changed = copy_list_with_links(&src, &mut dst, &mut resolver).unwrap();
        assert!(changed);
        assert_eq!(dst, vec![link(101), link(102)]);
    }

    #[test]
    fn copy_list_with_links_erases_links_to_deleted_targets() {
        let src = vec![link(1), link(13), link(2)];
        let mut dst = vec![];
        let mut resolver = OffsetResolver { offset: 0 };
        let changed = copy_list_with_links(&src, &mut dst, &mut resolver).unwrap();
        assert!(changed);
        // row 13's target is gone at the destination: that position is
        // erased outright rather than left null.
        assert_eq!(dst, vec![link(1), link(2)]);
    }

    #[test]
    fn copy_list_with_links_leaves_a_non_link_null_untouched() {
        let src = vec![MixedValue::Null, link(1)];
        let mut dst = vec![];
        let mut resolver = OffsetResolver { offset: 0 };
        let changed = copy_list_with_links(&src, &mut dst, &mut resolver).unwrap();
        assert!(changed);
        assert_eq!(dst, vec![MixedValue::Null, link(1)]);
    }
}
