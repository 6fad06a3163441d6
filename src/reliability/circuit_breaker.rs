//! Per-provider circuit breaker
//!
//! Stops calling a degraded provider after repeated failures and probes for
//! recovery after a cool-down. State lives in atomics so concurrent bulk
//! execution never takes a lock on the hot path: the OPEN -> HALF_OPEN
//! transition is derived from the opened-at timestamp on read. Cool-downs
//! are measured on a process-local monotonic clock; wall-clock timestamps
//! appear only in report fields.
//!
//! State machine:
//! - CLOSED: calls pass through. Consecutive failures reaching
//!   `failure_threshold` trip the breaker OPEN.
//! - OPEN: calls are rejected without consuming any retry budget. Once the
//!   cool-down elapses the next reader moves the breaker to HALF_OPEN.
//! - HALF_OPEN: up to `success_threshold` probe calls are admitted. That many
//!   successes close the breaker; any failure re-opens it immediately.

use crate::models::ProviderId;
use crate::store::unix_millis;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

static MONOTONIC_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds on a process-local monotonic clock. Cool-downs measured on
/// it cannot be stretched or shrunk by wall-clock steps.
fn monotonic_millis() -> u64 {
    MONOTONIC_ANCHOR.elapsed().as_millis() as u64
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker tuning, fixed per provider at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Successful probes required to close a half-open breaker.
    pub success_threshold: u32,
    /// Seconds the breaker stays open before admitting probes.
    pub timeout: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: 60.0,
        }
    }
}

impl CircuitBreakerConfig {
    /// Check the configuration for mistakes at registration time.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold < 1 {
            return Err("failure_threshold must be at least 1".to_string());
        }
        if self.success_threshold < 1 {
            return Err("success_threshold must be at least 1".to_string());
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err("timeout must be a positive number of seconds".to_string());
        }
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        (self.timeout * 1000.0) as u64
    }
}

/// Point-in-time breaker snapshot for reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_rejected: u64,
}

/// One breaker instance per provider. Never deleted, only reset.
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_probes: AtomicU32,
    opened_at_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    total_calls: AtomicU64,
    total_rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_probes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Current state, promoting OPEN to HALF_OPEN once the cool-down elapsed.
    pub fn current_state(&self) -> CircuitState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => {
                if monotonic_millis() >= self.next_attempt_ms() {
                    // Only the winning reader resets the probe counters.
                    if self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        self.success_count.store(0, Ordering::SeqCst);
                        self.half_open_probes.store(0, Ordering::SeqCst);
                        debug!(
                            provider = %self.provider,
                            "Circuit breaker half-open, admitting probes"
                        );
                    }
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Gate consulted before every call attempt. Never blocks.
    pub fn can_execute(&self) -> bool {
        match self.current_state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
            CircuitState::HalfOpen => {
                let admitted = self.half_open_probes.fetch_add(1, Ordering::SeqCst);
                if admitted < self.config.success_threshold {
                    true
                } else {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        match self.current_state() {
            CircuitState::Closed => {
                // Failures are counted consecutively; any success clears them.
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                    debug!(provider = %self.provider, "Circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {
                // Late result from a probe admitted before a concurrent
                // failure re-opened the breaker. Nothing to update.
            }
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(unix_millis(), Ordering::SeqCst);
        match self.current_state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip_open();
                    warn!(
                        provider = %self.provider,
                        failures = failures,
                        timeout_secs = self.config.timeout,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.trip_open();
                warn!(provider = %self.provider, "Probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Seconds until the breaker will admit a probe; 0 when not open.
    pub fn retry_after_secs(&self) -> f64 {
        if self.current_state() != CircuitState::Open {
            return 0.0;
        }
        let now = monotonic_millis();
        let next = self.next_attempt_ms();
        next.saturating_sub(now) as f64 / 1000.0
    }

    /// Force the breaker open, e.g. for maintenance windows.
    pub fn force_open(&self) {
        self.trip_open();
    }

    /// Force the breaker closed, clearing all counters.
    pub fn force_close(&self) {
        self.close();
    }

    /// Reset to the initial closed state.
    pub fn reset(&self) {
        self.close();
        self.opened_at_ms.store(0, Ordering::SeqCst);
        self.last_failure_ms.store(0, Ordering::SeqCst);
    }

    /// Snapshot for health reports.
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.current_state();
        let next_attempt_time = if state == CircuitState::Open {
            // opened_at_ms is monotonic; anchor the remaining cool-down to
            // the wall clock for the report.
            let remaining = self.next_attempt_ms().saturating_sub(monotonic_millis());
            Some(Utc::now() + chrono::Duration::milliseconds(remaining as i64))
        } else {
            None
        };
        let last_failure = self.last_failure_ms.load(Ordering::SeqCst);
        CircuitBreakerStats {
            provider: self.provider,
            state,
            failure_count: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            last_failure_time: (last_failure > 0)
                .then(|| DateTime::from_timestamp_millis(last_failure as i64))
                .flatten(),
            next_attempt_time,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }

    fn next_attempt_ms(&self) -> u64 {
        self.opened_at_ms
            .load(Ordering::SeqCst)
            .saturating_add(self.config.timeout_ms())
    }

    fn trip_open(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        self.opened_at_ms.store(monotonic_millis(), Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.half_open_probes.store(0, Ordering::SeqCst);
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.half_open_probes.store(0, Ordering::SeqCst);
    }
}

/// Shared registry of breakers, one per provider.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the provider's breaker, creating it with `config` on first use.
    pub fn get_or_create(
        &self,
        provider: ProviderId,
        config: &CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(&provider) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        // Another caller may have created it while we waited for the lock.
        Arc::clone(
            breakers
                .entry(provider)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, config.clone()))),
        )
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(&provider).map(Arc::clone)
    }

    /// Snapshot every registered breaker.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .read()
            .values()
            .map(|breaker| breaker.stats())
            .collect()
    }
}
