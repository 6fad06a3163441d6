//! Provider health aggregation
//!
//! Every attempt made through the reliability pipeline lands here as a
//! sample. Samples are kept in a rolling window per provider; from them the
//! aggregator derives error rate, average response time and availability,
//! checks them against per-provider SLA thresholds, and classifies each
//! provider as healthy, degraded or unhealthy.

use crate::models::{HealthMetrics, HealthStatus, ProviderId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// SLA targets a provider is held against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaThresholds {
    /// Maximum acceptable average response time, in milliseconds.
    pub response_time_ms: f64,
    /// Minimum acceptable success rate over the window.
    pub success_rate_percent: f64,
    /// Minimum acceptable availability over the window.
    pub availability_percent: f64,
    /// Maximum acceptable error rate over the window.
    pub error_rate_percent: f64,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self {
            response_time_ms: 500.0,
            success_rate_percent: 99.0,
            availability_percent: 99.9,
            error_rate_percent: 1.0,
        }
    }
}

impl SlaThresholds {
    /// Check the thresholds for configuration mistakes.
    pub fn validate(&self) -> Result<(), String> {
        if !self.response_time_ms.is_finite() || self.response_time_ms <= 0.0 {
            return Err("response_time_ms must be positive".to_string());
        }
        for (name, value) in [
            ("success_rate_percent", self.success_rate_percent),
            ("availability_percent", self.availability_percent),
            ("error_rate_percent", self.error_rate_percent),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(format!("{} must be within 0..=100", name));
            }
        }
        Ok(())
    }
}

struct Sample {
    recorded_at: Instant,
    wall_minute: i64,
    success: bool,
    response_time_ms: f64,
}

#[derive(Default)]
struct ProviderHealthState {
    samples: VecDeque<Sample>,
    success_total: u64,
    failure_total: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

impl ProviderHealthState {
    fn prune(&mut self, window: Duration, now: Instant) {
        while self
            .samples
            .front()
            .is_some_and(|s| now.duration_since(s.recorded_at) >= window)
        {
            self.samples.pop_front();
        }
    }
}

/// Rolling-window health tracker shared across the service.
pub struct HealthAggregator {
    window: Duration,
    states: RwLock<HashMap<ProviderId, ProviderHealthState>>,
    thresholds: RwLock<HashMap<ProviderId, SlaThresholds>>,
}

impl HealthAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            states: RwLock::new(HashMap::new()),
            thresholds: RwLock::new(HashMap::new()),
        }
    }

    /// Install SLA thresholds for a provider. Defaults apply otherwise.
    pub fn set_thresholds(&self, provider: ProviderId, thresholds: SlaThresholds) {
        self.thresholds.write().insert(provider, thresholds);
    }

    /// Thresholds in effect for a provider.
    pub fn thresholds(&self, provider: ProviderId) -> SlaThresholds {
        self.thresholds
            .read()
            .get(&provider)
            .cloned()
            .unwrap_or_default()
    }

    /// Record one attempt outcome.
    pub fn record(&self, provider: ProviderId, success: bool, response_time_ms: f64) {
        let now = Instant::now();
        let wall = Utc::now();
        let mut states = self.states.write();
        let state = states.entry(provider).or_default();
        state.prune(self.window, now);
        state.samples.push_back(Sample {
            recorded_at: now,
            wall_minute: wall.timestamp() / 60,
            success,
            response_time_ms,
        });
        if success {
            state.success_total += 1;
            state.last_success = Some(wall);
        } else {
            state.failure_total += 1;
            state.last_failure = Some(wall);
        }
    }

    /// Current rolling metrics for a provider, or `None` when no attempt has
    /// ever been recorded for it.
    pub fn metrics(&self, provider: ProviderId) -> Option<HealthMetrics> {
        let mut states = self.states.write();
        let state = states.get_mut(&provider)?;
        state.prune(self.window, Instant::now());

        let window_samples = state.samples.len();
        let (successes, response_time_sum) = state
            .samples
            .iter()
            .fold((0usize, 0.0f64), |(succ, sum), sample| {
                (
                    succ + usize::from(sample.success),
                    sum + sample.response_time_ms,
                )
            });
        let failures = window_samples - successes;

        let (error_rate, success_rate, avg_response_time) = if window_samples > 0 {
            (
                failures as f64 / window_samples as f64 * 100.0,
                successes as f64 / window_samples as f64 * 100.0,
                response_time_sum / window_samples as f64,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Some(HealthMetrics {
            provider,
            success_count: state.success_total,
            failure_count: state.failure_total,
            avg_response_time_ms: avg_response_time,
            error_rate_percent: error_rate,
            success_rate_percent: success_rate,
            availability_percent: self.availability(state),
            last_success: state.last_success,
            last_failure: state.last_failure,
            window_samples,
        })
    }

    /// Availability across the window: a minute with samples and zero
    /// successes counts as downtime, minutes without samples count as up.
    fn availability(&self, state: &ProviderHealthState) -> f64 {
        let mut buckets: HashMap<i64, (u32, u32)> = HashMap::new();
        for sample in &state.samples {
            let bucket = buckets.entry(sample.wall_minute).or_default();
            if sample.success {
                bucket.0 += 1;
            } else {
                bucket.1 += 1;
            }
        }
        let down_minutes = buckets
            .values()
            .filter(|(succ, fail)| *succ == 0 && *fail > 0)
            .count() as f64;
        let window_minutes = (self.window.as_secs() / 60).max(1) as f64;
        ((1.0 - down_minutes / window_minutes) * 100.0).clamp(0.0, 100.0)
    }

    /// Metrics plus classification and SLA verdict for a provider.
    pub fn evaluate(&self, provider: ProviderId) -> Option<(HealthStatus, HealthMetrics, bool)> {
        let metrics = self.metrics(provider)?;
        let thresholds = self.thresholds(provider);
        let (status, sla_compliant) = classify(&metrics, &thresholds);
        Some((status, metrics, sla_compliant))
    }

    /// Drop expired samples for every provider. Returns how many samples were
    /// removed. Called by the background sweeper so idle providers do not
    /// retain stale windows.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut states = self.states.write();
        for state in states.values_mut() {
            let before = state.samples.len();
            state.prune(self.window, now);
            removed += before - state.samples.len();
        }
        removed
    }

    /// Providers with at least one recorded attempt.
    pub fn tracked_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.states.read().keys().copied().collect();
        providers.sort();
        providers
    }
}

/// Classify rolling metrics against SLA thresholds.
///
/// Severe breaches (double the response-time target, success below 90%,
/// errors above 10%, availability below 95%) are unhealthy regardless of the
/// configured targets. Within SLA is healthy. Moderate breaches (response
/// time and error rate within 1.5x of target, success and availability within
/// 99% of target) are degraded; anything worse is unhealthy.
pub fn classify(metrics: &HealthMetrics, thresholds: &SlaThresholds) -> (HealthStatus, bool) {
    if metrics.window_samples == 0 {
        return (HealthStatus::Unknown, true);
    }

    let sla_compliant = metrics.avg_response_time_ms <= thresholds.response_time_ms
        && metrics.success_rate_percent >= thresholds.success_rate_percent
        && metrics.availability_percent >= thresholds.availability_percent
        && metrics.error_rate_percent <= thresholds.error_rate_percent;

    let severely_unhealthy = metrics.avg_response_time_ms >= thresholds.response_time_ms * 2.0
        || metrics.success_rate_percent < 90.0
        || metrics.error_rate_percent > 10.0
        || metrics.availability_percent < 95.0;
    if severely_unhealthy {
        return (HealthStatus::Unhealthy, sla_compliant);
    }
    if sla_compliant {
        return (HealthStatus::Healthy, true);
    }

    let within_degraded_band = metrics.avg_response_time_ms
        <= thresholds.response_time_ms * 1.5
        && metrics.error_rate_percent <= thresholds.error_rate_percent * 1.5
        && metrics.success_rate_percent >= thresholds.success_rate_percent * 0.99
        && metrics.availability_percent >= thresholds.availability_percent * 0.99;
    if within_degraded_band {
        (HealthStatus::Degraded, false)
    } else {
        (HealthStatus::Unhealthy, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metrics_with(
        avg_response_time_ms: f64,
        success_rate_percent: f64,
        error_rate_percent: f64,
        availability_percent: f64,
    ) -> HealthMetrics {
        HealthMetrics {
            provider: ProviderId::Generic,
            success_count: 100,
            failure_count: 0,
            avg_response_time_ms,
            error_rate_percent,
            success_rate_percent,
            availability_percent,
            last_success: Some(Utc::now()),
            last_failure: None,
            window_samples: 100,
        }
    }

    #[test]
    fn test_no_samples_is_unknown() {
        let aggregator = HealthAggregator::new(Duration::from_secs(300));
        assert!(aggregator.metrics(ProviderId::Payments).is_none());
        assert!(aggregator.evaluate(ProviderId::Payments).is_none());

        let empty = metrics_with(0.0, 0.0, 0.0, 100.0);
        let empty = HealthMetrics {
            window_samples: 0,
            ..empty
        };
        let (status, _) = classify(&empty, &SlaThresholds::default());
        assert_eq!(status, HealthStatus::Unknown);
    }

    #[test]
    fn test_window_rates_from_samples() {
        let aggregator = HealthAggregator::new(Duration::from_secs(300));
        for _ in 0..8 {
            aggregator.record(ProviderId::Sms, true, 100.0);
        }
        for _ in 0..2 {
            aggregator.record(ProviderId::Sms, false, 300.0);
        }

        let metrics = aggregator.metrics(ProviderId::Sms).unwrap();
        assert_eq!(metrics.window_samples, 10);
        assert_eq!(metrics.success_count, 8);
        assert_eq!(metrics.failure_count, 2);
        assert!((metrics.error_rate_percent - 20.0).abs() < 1e-9);
        assert!((metrics.success_rate_percent - 80.0).abs() < 1e-9);
        assert!((metrics.avg_response_time_ms - 140.0).abs() < 1e-9);
        assert!(metrics.last_success.is_some());
        assert!(metrics.last_failure.is_some());
    }

    #[test]
    fn test_availability_drops_when_a_minute_has_only_failures() {
        let aggregator = HealthAggregator::new(Duration::from_secs(300));
        for _ in 0..5 {
            aggregator.record(ProviderId::Email, false, 50.0);
        }
        let metrics = aggregator.metrics(ProviderId::Email).unwrap();
        assert!(metrics.availability_percent < 95.0);

        aggregator.record(ProviderId::Email, true, 50.0);
        let metrics = aggregator.metrics(ProviderId::Email).unwrap();
        assert!(metrics.availability_percent > 95.0);
    }

    #[tokio::test]
    async fn test_samples_age_out_but_totals_persist() {
        let aggregator = HealthAggregator::new(Duration::from_millis(40));
        aggregator.record(ProviderId::Calendar, true, 80.0);
        aggregator.record(ProviderId::Calendar, false, 80.0);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let metrics = aggregator.metrics(ProviderId::Calendar).unwrap();
        assert_eq!(metrics.window_samples, 0);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.error_rate_percent, 0.0);
    }

    #[test]
    fn test_classify_healthy_within_sla() {
        let thresholds = SlaThresholds::default();
        let (status, compliant) = classify(&metrics_with(120.0, 99.5, 0.5, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Healthy);
        assert!(compliant);
    }

    #[test]
    fn test_classify_degraded_band() {
        let thresholds = SlaThresholds::default();
        // Response time 1.4x target, everything else within SLA.
        let (status, compliant) = classify(&metrics_with(700.0, 99.5, 0.5, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Degraded);
        assert!(!compliant);
    }

    #[test]
    fn test_classify_unhealthy_floors() {
        let thresholds = SlaThresholds::default();

        let (status, _) = classify(&metrics_with(1000.0, 99.5, 0.5, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Unhealthy, "2x response time");

        let (status, _) = classify(&metrics_with(120.0, 89.0, 0.5, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Unhealthy, "success below 90%");

        let (status, _) = classify(&metrics_with(120.0, 99.5, 11.0, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Unhealthy, "errors above 10%");

        let (status, _) = classify(&metrics_with(120.0, 99.5, 0.5, 94.0), &thresholds);
        assert_eq!(status, HealthStatus::Unhealthy, "availability below 95%");
    }

    #[test]
    fn test_classify_outside_degraded_band_is_unhealthy() {
        let thresholds = SlaThresholds::default();
        // 1.8x response time: past the degraded band, short of the 2x floor.
        let (status, compliant) = classify(&metrics_with(900.0, 99.5, 0.5, 100.0), &thresholds);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert!(!compliant);
    }

    #[test]
    fn test_sla_requires_all_four_thresholds() {
        let thresholds = SlaThresholds::default();
        let cases = [
            metrics_with(600.0, 99.5, 0.5, 100.0),
            metrics_with(120.0, 98.5, 0.5, 100.0),
            metrics_with(120.0, 99.5, 1.5, 100.0),
            metrics_with(120.0, 99.5, 0.5, 99.0),
        ];
        for metrics in &cases {
            let (_, compliant) = classify(metrics, &thresholds);
            assert!(!compliant);
        }
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(SlaThresholds::default().validate().is_ok());
        assert!(SlaThresholds {
            response_time_ms: 0.0,
            ..SlaThresholds::default()
        }
        .validate()
        .is_err());
        assert!(SlaThresholds {
            success_rate_percent: 120.0,
            ..SlaThresholds::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_sweep_and_tracked_providers() {
        let aggregator = HealthAggregator::new(Duration::from_secs(300));
        aggregator.record(ProviderId::Payments, true, 10.0);
        aggregator.record(ProviderId::Sms, true, 10.0);
        assert_eq!(
            aggregator.tracked_providers(),
            vec![ProviderId::Payments, ProviderId::Sms]
        );
        assert_eq!(aggregator.sweep(), 0);
    }
}
