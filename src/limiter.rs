// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device minimum-interval gate.
//!
//! Tracks the last accepted timestamp for each device address and rejects
//! records arriving faster than the configured interval. Timestamps are
//! caller-supplied monotonic offsets, so the gate itself never reads a
//! clock and stays deterministic under test.
//!
//! The address map grows for the lifetime of the process; entries are
//! never evicted. The address space is bounded by physically nearby
//! devices, so this is accepted as a known limitation.

use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Rejections between informational log lines (cumulative, not per-device).
const REJECTION_LOG_EVERY: u64 = 100;

/// Accept/reject gate keyed by device address.
///
/// The ingestion loop is single-threaded per connection, so no locking is
/// needed here. Should concurrent connections ever be served, this map
/// must go behind a mutex: the lookup and the update must stay atomic as
/// a pair or two near-simultaneous records for one device both pass.
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: HashMap<String, Duration>,
    rejected: u64,
}

impl RateLimiter {
    /// Create a gate with the given minimum interval between accepted
    /// records per device.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: HashMap::new(),
            rejected: 0,
        }
    }

    /// Decide whether a record for `address` observed at `now` passes.
    ///
    /// Accepts when the address has no recorded timestamp or the interval
    /// has elapsed. Rejection bumps the cumulative counter but leaves the
    /// per-address state untouched; on acceptance the caller must follow
    /// up with [`record_accepted`](Self::record_accepted).
    pub fn should_accept(&mut self, address: &str, now: Duration) -> bool {
        match self.last_accepted.get(address) {
            Some(last) if now.saturating_sub(*last) < self.min_interval => {
                self.rejected += 1;
                if rejection_log_due(self.rejected) {
                    info!(rejected = self.rejected, "rate limiter rejections so far");
                }
                false
            }
            _ => true,
        }
    }

    /// Store the accept timestamp for `address`.
    pub fn record_accepted(&mut self, address: &str, now: Duration) {
        self.last_accepted.insert(address.to_string(), now);
    }

    /// Cumulative rejection count.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Number of device addresses currently tracked.
    pub fn tracked_devices(&self) -> usize {
        self.last_accepted.len()
    }
}

/// Whether a rejection total lands on a log boundary. Called with the
/// counter already incremented, so the first log fires at exactly
/// [`REJECTION_LOG_EVERY`] rejections.
fn rejection_log_due(rejected: u64) -> bool {
    rejected % REJECTION_LOG_EVERY == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_first_record_accepted() {
        let mut limiter = RateLimiter::new(secs(60));
        assert!(limiter.should_accept(ADDR, secs(0)));
        assert_eq!(limiter.rejected(), 0);
    }

    #[test]
    fn test_second_record_within_interval_rejected() {
        // Two records 5 seconds apart with a 60 second interval.
        let mut limiter = RateLimiter::new(secs(60));
        assert!(limiter.should_accept(ADDR, secs(100)));
        limiter.record_accepted(ADDR, secs(100));

        assert!(!limiter.should_accept(ADDR, secs(105)));
        assert_eq!(limiter.rejected(), 1);
    }

    #[test]
    fn test_accept_at_exact_interval_boundary() {
        let mut limiter = RateLimiter::new(secs(60));
        limiter.record_accepted(ADDR, secs(100));
        assert!(limiter.should_accept(ADDR, secs(160)));
    }

    #[test]
    fn test_rejection_does_not_move_the_window() {
        // Rejections inside the window must not reset it: the cluster is
        // gated against the first accepted record, not the latest attempt.
        let mut limiter = RateLimiter::new(secs(60));
        limiter.record_accepted(ADDR, secs(0));

        assert!(!limiter.should_accept(ADDR, secs(30)));
        assert!(!limiter.should_accept(ADDR, secs(59)));
        assert!(limiter.should_accept(ADDR, secs(61)));
        assert_eq!(limiter.rejected(), 2);
    }

    #[test]
    fn test_addresses_are_independent() {
        let mut limiter = RateLimiter::new(secs(60));
        limiter.record_accepted(ADDR, secs(0));

        assert!(limiter.should_accept("11:22:33:44:55:66", secs(5)));
        assert!(!limiter.should_accept(ADDR, secs(5)));
        assert_eq!(limiter.tracked_devices(), 1);
    }

    #[test]
    fn test_without_record_accepted_nothing_is_gated() {
        let mut limiter = RateLimiter::new(secs(60));
        assert!(limiter.should_accept(ADDR, secs(0)));
        // Caller never recorded the acceptance.
        assert!(limiter.should_accept(ADDR, secs(1)));
    }

    #[test]
    fn test_replay_after_interval_accepted_both_times() {
        let mut limiter = RateLimiter::new(secs(60));
        assert!(limiter.should_accept(ADDR, secs(0)));
        limiter.record_accepted(ADDR, secs(0));
        assert!(limiter.should_accept(ADDR, secs(120)));
        limiter.record_accepted(ADDR, secs(120));
        assert_eq!(limiter.rejected(), 0);
    }

    #[test]
    fn test_rejection_log_fires_every_hundredth() {
        assert!(!rejection_log_due(1));
        assert!(!rejection_log_due(99));
        assert!(rejection_log_due(100));
        assert!(!rejection_log_due(101));
        assert!(rejection_log_due(200));
    }

    #[test]
    fn test_rejection_counter_reaches_log_boundary() {
        // 100 rejections in a row cross the log boundary exactly once.
        let mut limiter = RateLimiter::new(secs(60));
        limiter.record_accepted(ADDR, secs(0));

        let boundary_hits: u64 = (0..100)
            .map(|_| {
                assert!(!limiter.should_accept(ADDR, secs(1)));
                u64::from(rejection_log_due(limiter.rejected()))
            })
            .sum();

        assert_eq!(limiter.rejected(), 100);
        assert_eq!(boundary_hits, 1);
    }

    #[test]
    fn test_zero_interval_never_rejects() {
        let mut limiter = RateLimiter::new(secs(0));
        limiter.record_accepted(ADDR, secs(10));
        assert!(limiter.should_accept(ADDR, secs(10)));
    }
}
