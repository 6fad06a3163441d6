//! Outbound per-provider rate limiter
//!
//! Sliding one-second and one-minute windows of request timestamps, checked
//! non-blocking before a call enters the pipeline. Burst allowance grants
//! extra instantaneous headroom on the per-second window; priority
//! multipliers scale the effective ceilings so critical traffic is admitted
//! under contention when normal traffic is refused. Denials are immediate -
//! the limiter never queues or sleeps.

use crate::models::{Priority, ProviderId, RateLimitInfo};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

const SECOND_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Per-provider rate limit configuration. Static after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained ceiling for the one-second window.
    pub requests_per_second: u32,
    /// Sustained ceiling for the one-minute window.
    pub requests_per_minute: u32,
    /// Extra instantaneous slots on top of the per-second ceiling.
    pub burst_allowance: u32,
    /// Effective-capacity scaling per request priority.
    pub priority_multipliers: HashMap<Priority, f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_minute: 300,
            burst_allowance: 5,
            priority_multipliers: default_multipliers(),
        }
    }
}

/// Low traffic yields budget; critical traffic borrows it.
pub fn default_multipliers() -> HashMap<Priority, f64> {
    [
        (Priority::Low, 0.5),
        (Priority::Normal, 1.0),
        (Priority::High, 1.5),
        (Priority::Critical, 2.0),
    ]
    .into_iter()
    .collect()
}

impl RateLimitConfig {
    /// Check the configuration for mistakes at registration time.
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_second < 1 {
            return Err("requests_per_second must be at least 1".to_string());
        }
        if self.requests_per_minute < 1 {
            return Err("requests_per_minute must be at least 1".to_string());
        }
        for (priority, multiplier) in &self.priority_multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(format!(
                    "priority multiplier for {} must be positive",
                    priority
                ));
            }
        }
        Ok(())
    }

    fn multiplier(&self, priority: Priority) -> f64 {
        self.priority_multipliers
            .get(&priority)
            .copied()
            .unwrap_or(1.0)
    }

    /// Effective per-second ceiling for a priority, burst included.
    fn effective_second_limit(&self, priority: Priority) -> u32 {
        let scaled = (self.requests_per_second as f64 * self.multiplier(priority)).ceil() as u32;
        scaled.saturating_add(self.burst_allowance)
    }

    /// Effective per-minute ceiling for a priority.
    fn effective_minute_limit(&self, priority: Priority) -> u32 {
        (self.requests_per_minute as f64 * self.multiplier(priority)).ceil() as u32
    }
}

struct WindowState {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    last_request: Instant,
}

impl WindowState {
    fn new() -> Self {
        Self {
            second: VecDeque::new(),
            minute: VecDeque::new(),
            last_request: Instant::now(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while self
            .second
            .front()
            .is_some_and(|t| now.duration_since(*t) >= SECOND_WINDOW)
        {
            self.second.pop_front();
        }
        while self
            .minute
            .front()
            .is_some_and(|t| now.duration_since(*t) >= MINUTE_WINDOW)
        {
            self.minute.pop_front();
        }
    }

    fn retry_after(&self, window: Duration, now: Instant) -> f64 {
        let deque = if window == SECOND_WINDOW {
            &self.second
        } else {
            &self.minute
        };
        match deque.front() {
            Some(oldest) => {
                let freed = *oldest + window;
                freed.saturating_duration_since(now).as_secs_f64()
            }
            None => 0.0,
        }
    }
}

/// Aggregate limiter counters for metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub allowed_total: u64,
    pub denied_total: u64,
    pub denied_percentage: f64,
    pub tracked_providers: usize,
}

/// Sliding-window limiter shared across the service.
#[derive(Default)]
pub struct RateLimiter {
    configs: RwLock<HashMap<ProviderId, RateLimitConfig>>,
    windows: Mutex<HashMap<ProviderId, WindowState>>,
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) a provider's limits.
    pub fn configure(&self, provider: ProviderId, config: RateLimitConfig) {
        self.configs.write().insert(provider, config);
    }

    /// Non-blocking admission check. Consumes one slot from both windows when
    /// admitted; otherwise reports which window refused and when to retry.
    pub fn try_acquire(&self, provider: ProviderId, priority: Priority) -> RateLimitInfo {
        let config = match self.configs.read().get(&provider) {
            Some(config) => config.clone(),
            None => {
                // Unregistered providers are not limited.
                self.allowed_total.fetch_add(1, Ordering::Relaxed);
                return RateLimitInfo::unlimited();
            }
        };

        let second_limit = config.effective_second_limit(priority);
        let minute_limit = config.effective_minute_limit(priority);
        let now = Instant::now();

        let mut windows = self.windows.lock();
        let state = windows
            .entry(provider)
            .or_insert_with(WindowState::new);
        state.prune(now);

        let second_count = state.second.len() as u32;
        let minute_count = state.minute.len() as u32;

        if second_count < second_limit && minute_count < minute_limit {
            state.second.push_back(now);
            state.minute.push_back(now);
            state.last_request = now;
            self.allowed_total.fetch_add(1, Ordering::Relaxed);

            let second_remaining = second_limit - (second_count + 1);
            let minute_remaining = minute_limit - (minute_count + 1);
            let (remaining, limit, window) = if second_remaining <= minute_remaining {
                (second_remaining, second_limit, "second")
            } else {
                (minute_remaining, minute_limit, "minute")
            };
            return RateLimitInfo {
                allowed: true,
                limit,
                remaining,
                retry_after: 0.0,
                window: window.to_string(),
            };
        }

        let (limit, window_name, window_span) = if second_count >= second_limit {
            (second_limit, "second", SECOND_WINDOW)
        } else {
            (minute_limit, "minute", MINUTE_WINDOW)
        };
        let retry_after = state.retry_after(window_span, now);
        state.last_request = now;
        self.denied_total.fetch_add(1, Ordering::Relaxed);
        trace!(
            provider = %provider,
            priority = %priority,
            window = window_name,
            retry_after_secs = retry_after,
            "Rate limit denial"
        );

        RateLimitInfo {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
            window: window_name.to_string(),
        }
    }

    /// Fraction of the base minute budget currently consumed, in [0, 1].
    pub fn utilization(&self, provider: ProviderId) -> f64 {
        let Some(limit) = self
            .configs
            .read()
            .get(&provider)
            .map(|c| c.requests_per_minute)
        else {
            return 0.0;
        };
        let mut windows = self.windows.lock();
        let Some(state) = windows.get_mut(&provider) else {
            return 0.0;
        };
        state.prune(Instant::now());
        (state.minute.len() as f64 / limit.max(1) as f64).min(1.0)
    }

    /// Drop window state for providers idle longer than `idle`. Returns how
    /// many entries were removed.
    pub fn sweep_stale(&self, idle: Duration) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        let now = Instant::now();
        windows.retain(|_, state| now.duration_since(state.last_request) < idle);
        before - windows.len()
    }

    /// Aggregate counters for the metrics endpoint.
    pub fn stats(&self) -> RateLimiterStats {
        let allowed = self.allowed_total.load(Ordering::Relaxed);
        let denied = self.denied_total.load(Ordering::Relaxed);
        let total = allowed + denied;
        RateLimiterStats {
            allowed_total: allowed,
            denied_total: denied,
            denied_percentage: if total > 0 {
                denied as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            tracked_providers: self.windows.lock().len(),
        }
    }
}
