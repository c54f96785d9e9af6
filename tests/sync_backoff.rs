use rand::rngs::StdRng;
use rand::SeedableRng;
use realm_core::sync::backoff::Backoff;
use realm_core::sync::connection::Connection;
use realm_core::sync::session::Session;
use realm_core::sync::{ConnectionTerminationReason, MessageType, SessionState};
use std::time::{Duration, Instant};

/// Scenario 6: a PONG with a mismatched timestamp is reported by
/// `Connection`; the caller then tears the connection down with the
/// `sync_protocol_violation` category, and per the reconnect back-off
/// bound that category's delay must be at least 1 hour.
#[test]
fn pong_timestamp_mismatch_forces_a_long_reconnect_delay() {
    let mut conn = Connection::new(Duration::from_secs(60), Duration::from_secs(120), Duration::from_secs(10));
    let t0 = Instant::now();
    conn.on_connected(t0);
    conn.on_ping_sent(t0, &mut StdRng::seed_from_u64(1));

    let ok = conn.on_pong_received(999, 1);
    assert!(!ok, "mismatched timestamp must be reported");

    let mut rng = StdRng::seed_from_u64(2);
    let delay = conn.on_disconnected(t0, ConnectionTerminationReason::SyncProtocolViolation, &mut rng);
    assert!(delay >= Duration::from_secs(45 * 60), "fatal categories use the ~1h delay: got {delay:?}");
}

/// Quantified invariant: delay at attempt n is in
/// `[0, max(1h, 5min * 2^min(n,k))]`. With the 5-minute cap in place,
/// the right-hand side collapses to `max(1h, 5min)` = 1h for every n,
/// so no delay should ever exceed that regardless of attempt count.
#[test]
fn reconnect_bound_holds_across_many_consecutive_failures() {
    let mut backoff = Backoff::new();
    let mut rng = StdRng::seed_from_u64(123);
    for _ in 0..20u32 {
        let delay = backoff.next_delay(ConnectionTerminationReason::OperationFailed, &mut rng);
        assert!(delay <= Duration::from_secs(60 * 60));
    }
}

/// A session activated, bound, and then told to deactivate must send
/// UNBIND ahead of anything still queued, and reach `Deactivated` only
/// after that UNBIND is actually sent.
#[test]
fn session_unbind_preempts_a_pending_upload_and_reaches_deactivated() {
    let mut session = Session::new();
    session.activate();
    assert_eq!(session.next_message(), Some(MessageType::Bind));
    session.mark_sent(MessageType::Bind);

    session.request_upload();
    session.begin_deactivating();
    assert_eq!(session.next_message(), Some(MessageType::Unbind));
    session.mark_sent(MessageType::Unbind);
    assert_eq!(session.state(), SessionState::Deactivated);
}
