use realm_core::history::server::{bootstrap_client_session, compact_history, integrate_client_changesets, ClientUpload};
use realm_core::history::{ClientFile, ClientType, HistoryState};
use realm_core::sync::DownloadCursor;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn two_peer_state() -> HistoryState {
    let mut s = HistoryState::new();
    s.client_files.push(ClientFile::new(11, ClientType::Regular));
    s.client_files.push(ClientFile::new(12, ClientType::Regular));
    s
}

/// Scenario 5: a client last seen 20s ago under a 10s TTL gets expired
/// on the next compaction, its reciprocal history is freed, and
/// `compacted_until_version` advances up to that peer's prior
/// `reciprocal_history_base_version`.
#[test]
fn expired_client_is_compacted_away_and_advances_the_compaction_floor() {
    let mut state = two_peer_state();

    // Three entries already in sync_history so there's something to compact.
    use realm_core::changeset::{Changeset, Instruction, Payload, PrimaryKeySelector};
    for i in 0u64..3u64 {
        let mut cs = Changeset::new(3);
        cs.instructions.push(Instruction::UpdateObject {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "name".into(),
            value: Payload::String(format!("v{i}")),
        });
        let mut rng = StdRng::seed_from_u64(i as u64);
        integrate_client_changesets(&mut state, vec![ClientUpload { file_ident: 3, changesets: vec![cs], timestamps: vec![10 + i] }], 10 + i, &mut rng);
    }

    // Client 2 (index 2) went silent 20s ago under a 10s TTL; client 3
    // (index 3, the one that just uploaded) is still recently seen.
    state.client_files[2].last_seen_timestamp = 80;
    state.client_files[2].reciprocal_history_base_version = 3;
    state.client_files[3].last_seen_timestamp = 99;
    state.client_files[3].reciprocal_history_base_version = 1;

    let mut rng = StdRng::seed_from_u64(42);
    compact_history(&mut state, 100, 10, 0, &mut rng).unwrap();

    assert!(state.client_files[2].is_expired());
    assert!(state.client_files[2].reciprocal_history.is_empty());
    assert!(state.compacted_until_version <= state.client_files[3].reciprocal_history_base_version);
}

#[test]
fn bootstrap_then_integrate_then_download_round_trip() {
    let mut state = two_peer_state();
    let (progress, locked) = bootstrap_client_session(&mut state, 2, ClientType::Regular, DownloadCursor::default(), 1).unwrap();
    assert_eq!(progress.client_version, 0);
    assert_eq!(locked, 0);

    use realm_core::changeset::{Changeset, Instruction, Payload, PrimaryKeySelector};
    let mut cs = Changeset::new(2);
    cs.instructions.push(Instruction::UpdateObject {
        table: "Person".into(),
        key: PrimaryKeySelector::RowIndex(0),
        column: "name".into(),
        value: Payload::String("alice".into()),
    });
    let mut rng = StdRng::seed_from_u64(5);
    let results = integrate_client_changesets(&mut state, vec![ClientUpload { file_ident: 2, changesets: vec![cs], timestamps: vec![2] }], 2, &mut rng);
    assert!(results[0].result.is_ok());

    let info = realm_core::history::server::fetch_download_info(&state, 3, 0, state.latest_version(), u64::MAX);
    assert_eq!(info.entries.len(), 1);
    assert_eq!(info.entries[0].origin_file_ident, 2);
}
