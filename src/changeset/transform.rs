//! Operational transform: rewrites a batch of remote instructions so
//! they apply cleanly on top of history already accepted locally.
//! Array positions shift to account for locally-accepted inserts/
//! erases on the same array; conflicting scalar writes to the same
//! field resolve by last-writer-wins with an explicit tie-break.

use super::{Changeset, Instruction, PrimaryKeySelector};
use crate::error::ChangesetError;

/// One already-accepted changeset plus the ordering fields a conflict
/// tie-break needs.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub changeset: Changeset,
    pub timestamp: u64,
}

/// One incoming changeset plus the timestamp it carries, so a scalar
/// conflict against local history can be resolved deterministically.
#[derive(Clone, Debug)]
pub struct RemoteChangeset {
    pub changeset: Changeset,
    pub timestamp: u64,
}

fn array_site<'a>(ins: &'a Instruction) -> Option<(&'a str, &'a PrimaryKeySelector, &'a str, u64)> {
    match ins {
        Instruction::ArrayInsert { table, key, column, index, .. } => Some((table, key, column, *index)),
        Instruction::ArrayErase { table, key, column, index } => Some((table, key, column, *index)),
        _ => None,
    }
}

fn scalar_site<'a>(ins: &'a Instruction) -> Option<(&'a str, &'a PrimaryKeySelector, &'a str)> {
    match ins {
        Instruction::UpdateObject { table, key, column, .. } => Some((table, key, column)),
        Instruction::DictUpdate { table, key, column, .. } => Some((table, key, column)),
        _ => None,
    }
}

/// `(table, key, column)` by value-equality, since `PrimaryKeySelector`
/// doesn't implement `Hash`/`Ord` and the expected cardinality here is
/// small (one batch's worth of instructions).
fn same_site(a: (&str, &PrimaryKeySelector, &str), b: (&str, &PrimaryKeySelector, &str)) -> bool {
    a.0 == b.0 && a.1 == b.1 && a.2 == b.2
}

/// Shifts `index` on a remote array instruction past every local
/// insert at-or-before it, and pulls it back for every local erase
/// strictly before it, applied in local history order.
fn remap_array_index(local: &[HistoryEntry], table: &str, key: &PrimaryKeySelector, column: &str, index: u64) -> u64 {
    let mut index = index as i64;
    for entry in local {
        for ins in &entry.changeset.instructions {
            let Some(site) = array_site(ins) else { continue };
            if !same_site((site.0, site.1, site.2), (table, key, column)) {
                continue;
            }
            match ins {
                Instruction::ArrayInsert { index: at, .. } if (*at as i64) <= index => index += 1,
                Instruction::ArrayErase { index: at, .. } if (*at as i64) < index => index -= 1,
                _ => {}
            }
        }
    }
    index.max(0) as u64
}

/// `true` if a local scalar write to the same field should win over
/// `remote_timestamp`/`remote_origin`, by (timestamp, origin_file_ident).
fn local_wins(local_timestamp: u64, local_origin: u64, remote_timestamp: u64, remote_origin: u64) -> bool {
    (local_timestamp, local_origin) >= (remote_timestamp, remote_origin)
}

/// Rewrites `remote` in place against `local`. A remote scalar write
/// that loses its tie-break is dropped (turned into a no-op by
/// clearing `remote`'s instruction list entry is not possible without
/// shifting indices of a `Vec`, so dropped instructions are filtered
/// out of each changeset's instruction list at the end).
pub fn transform_remote(local: &[HistoryEntry], remote: &mut [RemoteChangeset]) -> Result<(), ChangesetError> {
    for r in remote.iter_mut() {
        let remote_timestamp = r.timestamp;
        let remote_origin = r.changeset.origin_file_ident;
        let mut keep = vec![true; r.changeset.instructions.len()];

        for (i, ins) in r.changeset.instructions.iter_mut().enumerate() {
            if let Some((table, key, column, index)) = array_site(ins).map(|(t, k, c, i)| (t.to_string(), k.clone(), c.to_string(), i)) {
                let new_index = remap_array_index(local, &table, &key, &column, index);
                match ins {
                    Instruction::ArrayInsert { index, .. } | Instruction::ArrayErase { index, .. } => {
                        *index = new_index;
                    }
                    _ => unreachable!(),
                }
                continue;
            }
            if let Some(site) = scalar_site(ins).map(|(t, k, c)| (t.to_string(), k.clone(), c.to_string())) {
                let site_ref = (site.0.as_str(), &site.1, site.2.as_str());
                let beaten_by_local = local.iter().any(|entry| {
                    entry.changeset.instructions.iter().any(|local_ins| {
                        scalar_site(local_ins)
                            .map(|ls| same_site(ls, site_ref))
                            .unwrap_or(false)
                            && local_wins(entry.timestamp, entry.changeset.origin_file_ident, remote_timestamp, remote_origin)
                    })
                });
                if beaten_by_local {
                    keep[i] = false;
                }
            }
        }

        let mut i = 0;
        r.changeset.instructions.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::Payload;

    fn update(table: &str, row: u64, column: &str, value: &str, origin: u64) -> Changeset {
        let mut cs = Changeset::new(origin);
        cs.instructions.push(Instruction::UpdateObject {
            table: table.into(),
            key: PrimaryKeySelector::RowIndex(row),
            column: column.into(),
            value: Payload::String(value.into()),
        });
        cs
    }

    #[test]
    fn later_local_write_beats_an_earlier_remote_write_to_the_same_field() {
        let local = vec![HistoryEntry { changeset: update("Person", 0, "name", "local", 1), timestamp: 10 }];
        let mut remote = vec![RemoteChangeset { changeset: update("Person", 0, "name", "remote", 2), timestamp: 5 }];

        transform_remote(&local, &mut remote).unwrap();

        assert!(remote[0].changeset.instructions.is_empty(), "remote's stale write must be dropped");
    }

    #[test]
    fn earlier_local_write_loses_to_a_later_remote_write() {
        let local = vec![HistoryEntry { changeset: update("Person", 0, "name", "local", 1), timestamp: 5 }];
        let mut remote = vec![RemoteChangeset { changeset: update("Person", 0, "name", "remote", 2), timestamp: 10 }];

        transform_remote(&local, &mut remote).unwrap();

        assert_eq!(remote[0].changeset.instructions.len(), 1);
    }

    #[test]
    fn remote_array_index_shifts_past_a_local_insert_at_or_before_it() {
        let mut local_cs = Changeset::new(1);
        local_cs.instructions.push(Instruction::ArrayInsert {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "tags".into(),
            index: 0,
            value: Payload::String("urgent".into()),
        });
        let local = vec![HistoryEntry { changeset: local_cs, timestamp: 1 }];

        let mut remote_cs = Changeset::new(2);
        remote_cs.instructions.push(Instruction::ArrayInsert {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "tags".into(),
            index: 0,
            value: Payload::String("fun".into()),
        });
        let mut remote = vec![RemoteChangeset { changeset: remote_cs, timestamp: 2 }];

        transform_remote(&local, &mut remote).unwrap();

        let Instruction::ArrayInsert { index, .. } = &remote[0].changeset.instructions[0] else { panic!() };
        assert_eq!(*index, 1);
    }
}
