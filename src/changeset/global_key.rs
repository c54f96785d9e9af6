//! Rewrites every `GlobalKey(0, lo)` produced before a file's peer
//! ident was known into `GlobalKey(assigned, lo)` once the server hands
//! that ident out. Shared by the transformer (remote changesets may
//! carry unresolved keys) and the client history's own bootstrap path.

use super::{Changeset, GlobalKey};

/// Rewrites every object identity minted with `peer_ident_hi == 0` in
/// `changesets` to use `assigned` instead, including identities that
/// appear inside link payloads.
pub fn assign_file_ident(changesets: &mut [Changeset], assigned: u64) {
    let mut rewrite = |key: &GlobalKey| -> GlobalKey {
        if key.peer_ident_hi == 0 {
            GlobalKey { peer_ident_hi: assigned, sequence_lo: key.sequence_lo }
        } else {
            *key
        }
    };
    for cs in changesets {
        for ins in &mut cs.instructions {
            ins.rewrite_global_keys(&mut rewrite);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{Instruction, Payload, PrimaryKeySelector};

    #[test]
    fn rewrites_unresolved_keys_everywhere_they_appear() {
        let unresolved = GlobalKey { peer_ident_hi: 0, sequence_lo: 7 };
        let mut cs = Changeset::new(0);
        cs.instructions.push(Instruction::CreateObject {
            table: "T".into(),
            key: PrimaryKeySelector::Global(unresolved),
        });
        cs.instructions.push(Instruction::UpdateObject {
            table: "U".into(),
            key: PrimaryKeySelector::RowIndex(3),
            column: "friend".into(),
            value: Payload::Link { table: "T".into(), key: PrimaryKeySelector::Global(unresolved) },
        });

        assign_file_ident(std::slice::from_mut(&mut cs), 42);

        let Instruction::CreateObject { key, .. } = &cs.instructions[0] else { panic!() };
        assert_eq!(key, &PrimaryKeySelector::Global(GlobalKey { peer_ident_hi: 42, sequence_lo: 7 }));
        let Instruction::UpdateObject { value: Payload::Link { key, .. }, .. } = &cs.instructions[1] else {
            panic!()
        };
        assert_eq!(key, &PrimaryKeySelector::Global(GlobalKey { peer_ident_hi: 42, sequence_lo: 7 }));
    }

    #[test]
    fn leaves_already_resolved_keys_alone() {
        let resolved = GlobalKey { peer_ident_hi: 5, sequence_lo: 1 };
        let mut cs = Changeset::new(0);
        cs.instructions.push(Instruction::CreateObject {
            table: "T".into(),
            key: PrimaryKeySelector::Global(resolved),
        });
        assign_file_ident(std::slice::from_mut(&mut cs), 42);
        let Instruction::CreateObject { key, .. } = &cs.instructions[0] else { panic!() };
        assert_eq!(key, &PrimaryKeySelector::Global(resolved));
    }
}
