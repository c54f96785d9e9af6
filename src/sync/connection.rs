//! Connection state machine (§4.8): the transport-level half of a sync
//! session, independent of the actual socket. `sync/runtime.rs` is the
//! only module that touches a real socket; it drives this state
//! machine from the bytes it reads and writes the frames this produces.

use super::backoff::Backoff;
use super::{ConnectionState, ConnectionTerminationReason};
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct Connection {
    state: ConnectionState,
    backoff: Backoff,
    ping_keepalive_period: Duration,
    pong_keepalive_timeout: Duration,
    connect_timeout: Duration,
    next_ping_due: Option<Instant>,
    pong_deadline: Option<Instant>,
    reconnect_due: Option<Instant>,
    connecting_since: Option<Instant>,
    first_ping_after_connect: bool,
    enlisted_to_send: VecDeque<u64>,
}

impl Connection {
    pub fn new(ping_keepalive_period: Duration, pong_keepalive_timeout: Duration, connect_timeout: Duration) -> Connection {
        Connection {
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(),
            ping_keepalive_period,
            pong_keepalive_timeout,
            connect_timeout,
            next_ping_due: None,
            pong_deadline: None,
            reconnect_due: None,
            connecting_since: None,
            first_ping_after_connect: true,
            enlisted_to_send: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn begin_connecting(&mut self, now: Instant) {
        self.state = ConnectionState::Connecting;
        self.connecting_since = Some(now);
        self.reconnect_due = None;
    }

    /// The connect-timeout watchdog covers every sub-step (DNS, TCP,
    /// HTTP CONNECT, TLS, WebSocket upgrade) as one deadline rather than
    /// one per sub-step, since none of them report partial progress the
    /// watchdog could usefully reset on.
    pub fn connect_timed_out(&self, now: Instant) -> bool {
        match self.connecting_since {
            Some(since) => self.state == ConnectionState::Connecting && now.duration_since(since) >= self.connect_timeout,
            None => false,
        }
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        self.first_ping_after_connect = true;
        self.next_ping_due = Some(now + self.ping_keepalive_period);
    }

    /// Returns the reconnect delay to wait, enters `Disconnected`, and
    /// schedules `reconnect_due`.
    pub fn on_disconnected(&mut self, now: Instant, reason: ConnectionTerminationReason, rng: &mut impl Rng) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.connecting_since = None;
        self.next_ping_due = None;
        self.pong_deadline = None;
        let delay = self.backoff.next_delay(reason, rng);
        self.reconnect_due = Some(now + delay);
        delay
    }

    /// `true` once the scheduled reconnect delay has elapsed, or
    /// immediately if `cancel_reconnect_delay` was called.
    pub fn reconnect_due(&self, now: Instant) -> bool {
        match self.reconnect_due {
            Some(due) => now >= due,
            None => false,
        }
    }

    /// Forces an immediate reconnect attempt, e.g. because the
    /// application observed network connectivity return.
    pub fn cancel_reconnect_delay(&mut self) {
        self.reconnect_due = Some(Instant::now() - Duration::from_secs(1));
    }

    pub fn server_try_again_later(&mut self, delay: Duration) {
        self.backoff.set_try_again_later_cap(delay);
    }

    /// `true` if a PING is due to be sent now. The first PING after
    /// connecting fires at the full period; every later one is jittered
    /// down by up to 10%, so callers should check this against a
    /// pre-computed deadline rather than recomputing the period here.
    pub fn ping_due(&self, now: Instant) -> bool {
        matches!(self.next_ping_due, Some(due) if now >= due)
    }

    pub fn on_ping_sent(&mut self, now: Instant, rng: &mut impl Rng) {
        self.pong_deadline = Some(now + self.pong_keepalive_timeout);
        let period = if self.first_ping_after_connect {
            self.first_ping_after_connect = false;
            self.ping_keepalive_period
        } else {
            let deduction = self.ping_keepalive_period.mul_f64(0.10 * rng.gen::<f64>());
            self.ping_keepalive_period.saturating_sub(deduction)
        };
        self.next_ping_due = Some(now + period);
    }

    /// Clears the PONG watchdog. Returns `false` if the echoed
    /// timestamp doesn't match what was sent, a sync-protocol
    /// violation the caller should treat as a reason to disconnect.
    pub fn on_pong_received(&mut self, echoed_timestamp: u64, sent_timestamp: u64) -> bool {
        self.pong_deadline = None;
        echoed_timestamp == sent_timestamp
    }

    pub fn pong_timed_out(&self, now: Instant) -> bool {
        matches!(self.pong_deadline, Some(deadline) if now >= deadline)
    }

    pub fn enlist_to_send(&mut self, session_ident: u64) {
        if !self.enlisted_to_send.contains(&session_ident) {
            self.enlisted_to_send.push_back(session_ident);
        }
    }

    /// Pops the next enlisted session in strict FIFO order.
    pub fn send_one_message(&mut self) -> Option<u64> {
        self.enlisted_to_send.pop_front()
    }
}
