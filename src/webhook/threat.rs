//! Source behavior tracking for inbound webhooks
//!
//! Tracks per-source request rates, signature failures and historical
//! validation outcomes, and derives an IP reputation from them. The
//! validator consults this tracker for its behavioral checks; reputation
//! feeds back into scoring and, for blocked sources, outright rejection.

use crate::models::{IpReputation, ProviderId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Requests per minute from one source above which it counts as rapid-fire.
pub const RAPID_FIRE_PER_MINUTE: u32 = 60;
/// Recent signature failures from one source above which it is flagged.
pub const SIGNATURE_FAILURE_THRESHOLD: u32 = 5;

const REQUEST_WINDOW: Duration = Duration::from_secs(60);
const SIGNATURE_FAILURE_WINDOW: Duration = Duration::from_secs(600);

#[derive(Default)]
struct SourceHistory {
    successes: u64,
    failures: u64,
}

impl SourceHistory {
    fn total(&self) -> u64 {
        self.successes + self.failures
    }

    fn reputation(&self) -> IpReputation {
        let total = self.total();
        if total == 0 {
            return IpReputation::Neutral;
        }
        let failure_rate = self.failures as f64 / total as f64;
        if self.failures >= 20 && failure_rate > 0.8 {
            IpReputation::Blocked
        } else if self.failures >= 5 && failure_rate > 0.5 {
            IpReputation::Suspicious
        } else if self.successes >= 10 && failure_rate <= 0.05 {
            IpReputation::Trusted
        } else {
            IpReputation::Neutral
        }
    }
}

struct TimedEntry {
    events: VecDeque<Instant>,
    last_seen: Instant,
}

impl Default for TimedEntry {
    fn default() -> Self {
        Self {
            events: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }
}

impl TimedEntry {
    fn note(&mut self, window: Duration) -> u32 {
        let now = Instant::now();
        self.prune(window, now);
        self.events.push_back(now);
        self.last_seen = now;
        self.events.len() as u32
    }

    fn count(&mut self, window: Duration) -> u32 {
        self.prune(window, Instant::now());
        self.events.len() as u32
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        while self
            .events
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            self.events.pop_front();
        }
    }
}

/// Shared tracker of webhook source behavior.
#[derive(Default)]
pub struct ThreatTracker {
    requests: DashMap<(ProviderId, IpAddr), TimedEntry>,
    signature_failures: DashMap<IpAddr, TimedEntry>,
    histories: DashMap<IpAddr, SourceHistory>,
}

impl ThreatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one inbound request and return the source's count for the
    /// current minute, this request included.
    pub fn note_request(&self, provider: ProviderId, ip: IpAddr) -> u32 {
        self.requests
            .entry((provider, ip))
            .or_default()
            .note(REQUEST_WINDOW)
    }

    /// Whether a just-observed per-minute count crosses the rapid-fire bar.
    pub fn is_rapid_fire(count: u32) -> bool {
        count > RAPID_FIRE_PER_MINUTE
    }

    /// Record one failed signature verification from a source.
    pub fn note_signature_failure(&self, ip: IpAddr) {
        self.signature_failures
            .entry(ip)
            .or_default()
            .note(SIGNATURE_FAILURE_WINDOW);
    }

    /// Signature failures from a source inside the tracking window.
    pub fn recent_signature_failures(&self, ip: IpAddr) -> u32 {
        self.signature_failures
            .get_mut(&ip)
            .map(|mut entry| entry.count(SIGNATURE_FAILURE_WINDOW))
            .unwrap_or(0)
    }

    /// Fold one validation outcome into the source's history.
    pub fn record_outcome(&self, ip: IpAddr, valid: bool) {
        let mut history = self.histories.entry(ip).or_default();
        if valid {
            history.successes += 1;
        } else {
            history.failures += 1;
        }
    }

    /// Current reputation of a source address.
    pub fn reputation(&self, ip: IpAddr) -> IpReputation {
        self.histories
            .get(&ip)
            .map(|h| h.reputation())
            .unwrap_or(IpReputation::Neutral)
    }

    /// Drop rate/failure windows idle longer than `max_idle`. Outcome
    /// histories are kept; they are bounded by the number of distinct
    /// sources, not by traffic.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.requests.len() + self.signature_failures.len();
        self.requests
            .retain(|_, entry| now.duration_since(entry.last_seen) < max_idle);
        self.signature_failures
            .retain(|_, entry| now.duration_since(entry.last_seen) < max_idle);
        before - (self.requests.len() + self.signature_failures.len())
    }

    /// Number of sources with recorded history.
    pub fn tracked_sources(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn test_request_counting_and_rapid_fire() {
        let tracker = ThreatTracker::new();
        for expected in 1..=RAPID_FIRE_PER_MINUTE {
            let count = tracker.note_request(ProviderId::Payments, ip(1));
            assert_eq!(count, expected);
            assert!(!ThreatTracker::is_rapid_fire(count));
        }
        let count = tracker.note_request(ProviderId::Payments, ip(1));
        assert!(ThreatTracker::is_rapid_fire(count));

        // Separate provider and source keys do not share windows.
        assert_eq!(tracker.note_request(ProviderId::Sms, ip(1)), 1);
        assert_eq!(tracker.note_request(ProviderId::Payments, ip(2)), 1);
    }

    #[test]
    fn test_signature_failure_tracking() {
        let tracker = ThreatTracker::new();
        assert_eq!(tracker.recent_signature_failures(ip(3)), 0);
        for _ in 0..SIGNATURE_FAILURE_THRESHOLD {
            tracker.note_signature_failure(ip(3));
        }
        assert_eq!(
            tracker.recent_signature_failures(ip(3)),
            SIGNATURE_FAILURE_THRESHOLD
        );
        assert_eq!(tracker.recent_signature_failures(ip(4)), 0);
    }

    #[test]
    fn test_reputation_starts_neutral() {
        let tracker = ThreatTracker::new();
        assert_eq!(tracker.reputation(ip(5)), IpReputation::Neutral);
    }

    #[test]
    fn test_reputation_trusted_after_consistent_successes() {
        let tracker = ThreatTracker::new();
        for _ in 0..10 {
            tracker.record_outcome(ip(6), true);
        }
        assert_eq!(tracker.reputation(ip(6)), IpReputation::Trusted);

        // A meaningful failure share drops it back to neutral.
        for _ in 0..3 {
            tracker.record_outcome(ip(6), false);
        }
        assert_eq!(tracker.reputation(ip(6)), IpReputation::Neutral);
    }

    #[test]
    fn test_reputation_suspicious_then_blocked() {
        let tracker = ThreatTracker::new();
        for _ in 0..6 {
            tracker.record_outcome(ip(7), false);
        }
        for _ in 0..4 {
            tracker.record_outcome(ip(7), true);
        }
        assert_eq!(tracker.reputation(ip(7)), IpReputation::Suspicious);

        for _ in 0..20 {
            tracker.record_outcome(ip(7), false);
        }
        assert_eq!(tracker.reputation(ip(7)), IpReputation::Blocked);
    }

    #[test]
    fn test_sweep_drops_idle_windows_only() {
        let tracker = ThreatTracker::new();
        tracker.note_request(ProviderId::Email, ip(8));
        tracker.note_signature_failure(ip(8));
        tracker.record_outcome(ip(8), false);

        assert_eq!(tracker.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.sweep(Duration::ZERO), 2);
        assert_eq!(tracker.tracked_sources(), 1);
    }
}
