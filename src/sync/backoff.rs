//! Reconnect delay schedule (§4.8): exponential back-off per failure
//! category, capped and jittered so a flock of clients reconnecting
//! after an outage don't all retry in lockstep.

use super::ConnectionTerminationReason;
use rand::Rng;
use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_secs(1);
const CAP_DELAY: Duration = Duration::from_secs(5 * 60);
const FATAL_DELAY: Duration = Duration::from_secs(60 * 60);

fn is_fatal(reason: ConnectionTerminationReason) -> bool {
    matches!(
        reason,
        ConnectionTerminationReason::HttpResponseSaysFatal
            | ConnectionTerminationReason::SslServerCertRejected
            | ConnectionTerminationReason::MissingFeature
            | ConnectionTerminationReason::SyncProtocolViolation
    )
}

/// Tracks the current reconnect attempt count for one connection. A
/// fresh successful connection should call `reset()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Backoff {
    consecutive_failures: u32,
    try_again_later_cap: Option<Duration>,
}

impl Backoff {
    pub fn new() -> Backoff {
        Backoff::default()
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.try_again_later_cap = None;
    }

    /// Server asked for a specific retry delay (§6.3 ERROR message);
    /// caps future doubling without resetting the attempt count, so a
    /// second unrelated failure right after still doubles from where it
    /// left off.
    pub fn set_try_again_later_cap(&mut self, delay: Duration) {
        self.try_again_later_cap = Some(delay);
    }

    /// The un-jittered delay for the next attempt, given the reason the
    /// previous attempt ended.
    fn base_for(&self, reason: ConnectionTerminationReason) -> Duration {
        if is_fatal(reason) {
            return FATAL_DELAY;
        }
        let shift = self.consecutive_failures.min(16);
        let scaled = BASE_DELAY.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        let cap = self.try_again_later_cap.unwrap_or(CAP_DELAY);
        scaled.min(cap)
    }

    /// Records a failed attempt and returns the jittered delay to wait
    /// before the next one. Jitter subtracts up to 25% of the base
    /// delay, matching §4.8's "randomized deduction".
    pub fn next_delay(&mut self, reason: ConnectionTerminationReason, rng: &mut impl Rng) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let base = self.base_for(reason);
        let max_deduction = base.mul_f64(0.25);
        let deduction = max_deduction.mul_f64(rng.gen::<f64>());
        base.saturating_sub(deduction)
    }
}
