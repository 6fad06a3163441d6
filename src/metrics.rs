//! Service metrics
//!
//! Lock-free counters updated on the hot paths and exposed two ways: a JSON
//! snapshot for the health endpoints and Prometheus text for scraping.

use crate::models::{BulkOperationResult, CallOutcome, WebhookValidationResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared atomic counters for the whole service.
pub struct ServiceMetrics {
    started_at: Instant,
    calls_total: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    calls_rejected_circuit: AtomicU64,
    calls_rejected_rate_limit: AtomicU64,
    attempts_total: AtomicU64,
    bulk_runs_total: AtomicU64,
    bulk_items_total: AtomicU64,
    webhooks_received: AtomicU64,
    webhooks_valid: AtomicU64,
    webhooks_rejected: AtomicU64,
    webhooks_flagged: AtomicU64,
    response_time_ms_sum: AtomicU64,
    response_time_samples: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub calls_total: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub calls_rejected_circuit: u64,
    pub calls_rejected_rate_limit: u64,
    pub attempts_total: u64,
    pub avg_response_time_ms: f64,
    pub bulk_runs_total: u64,
    pub bulk_items_total: u64,
    pub webhooks_received: u64,
    pub webhooks_valid: u64,
    pub webhooks_rejected: u64,
    pub webhooks_flagged: u64,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            calls_total: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            calls_rejected_circuit: AtomicU64::new(0),
            calls_rejected_rate_limit: AtomicU64::new(0),
            attempts_total: AtomicU64::new(0),
            bulk_runs_total: AtomicU64::new(0),
            bulk_items_total: AtomicU64::new(0),
            webhooks_received: AtomicU64::new(0),
            webhooks_valid: AtomicU64::new(0),
            webhooks_rejected: AtomicU64::new(0),
            webhooks_flagged: AtomicU64::new(0),
            response_time_ms_sum: AtomicU64::new(0),
            response_time_samples: AtomicU64::new(0),
        }
    }

    /// Fold one pipeline outcome into the counters.
    pub fn record_call(&self, outcome: &CallOutcome) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CallOutcome::Ok(result) => {
                self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                self.attempts_total
                    .fetch_add(u64::from(result.attempt_count), Ordering::Relaxed);
                self.observe_response_time(result.response_time);
            }
            CallOutcome::Failed(result) => {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
                self.attempts_total
                    .fetch_add(u64::from(result.attempt_count), Ordering::Relaxed);
                self.observe_response_time(result.response_time);
            }
            CallOutcome::CircuitOpen { .. } => {
                self.calls_rejected_circuit.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::RateLimited { .. } => {
                self.calls_rejected_rate_limit
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Fold one bulk run into the counters.
    pub fn record_bulk(&self, result: &BulkOperationResult) {
        self.bulk_runs_total.fetch_add(1, Ordering::Relaxed);
        self.bulk_items_total
            .fetch_add(result.total_items as u64, Ordering::Relaxed);
    }

    /// Fold one webhook validation into the counters.
    pub fn record_webhook(&self, result: &WebhookValidationResult) {
        self.webhooks_received.fetch_add(1, Ordering::Relaxed);
        if result.is_valid {
            self.webhooks_valid.fetch_add(1, Ordering::Relaxed);
        } else {
            self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
        }
        if !result.threat_indicators.is_empty() {
            self.webhooks_flagged.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn observe_response_time(&self, response_time_secs: f64) {
        let ms = (response_time_secs * 1000.0).max(0.0) as u64;
        self.response_time_ms_sum.fetch_add(ms, Ordering::Relaxed);
        self.response_time_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.response_time_samples.load(Ordering::Relaxed);
        let sum = self.response_time_ms_sum.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_succeeded: self.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            calls_rejected_circuit: self.calls_rejected_circuit.load(Ordering::Relaxed),
            calls_rejected_rate_limit: self.calls_rejected_rate_limit.load(Ordering::Relaxed),
            attempts_total: self.attempts_total.load(Ordering::Relaxed),
            avg_response_time_ms: if samples > 0 {
                sum as f64 / samples as f64
            } else {
                0.0
            },
            bulk_runs_total: self.bulk_runs_total.load(Ordering::Relaxed),
            bulk_items_total: self.bulk_items_total.load(Ordering::Relaxed),
            webhooks_received: self.webhooks_received.load(Ordering::Relaxed),
            webhooks_valid: self.webhooks_valid.load(Ordering::Relaxed),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::Relaxed),
            webhooks_flagged: self.webhooks_flagged.load(Ordering::Relaxed),
        }
    }

    /// Render the counters in Prometheus exposition format.
    pub fn to_prometheus_format(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(2048);

        let counters = [
            (
                "reliability_calls_total",
                "Calls that entered the pipeline",
                snapshot.calls_total,
            ),
            (
                "reliability_calls_succeeded_total",
                "Calls that ultimately succeeded",
                snapshot.calls_succeeded,
            ),
            (
                "reliability_calls_failed_total",
                "Calls that exhausted their attempts or failed permanently",
                snapshot.calls_failed,
            ),
            (
                "reliability_calls_rejected_circuit_total",
                "Calls rejected by an open circuit",
                snapshot.calls_rejected_circuit,
            ),
            (
                "reliability_calls_rejected_rate_limit_total",
                "Calls rejected by the outbound rate limiter",
                snapshot.calls_rejected_rate_limit,
            ),
            (
                "reliability_attempts_total",
                "Individual attempts across all calls",
                snapshot.attempts_total,
            ),
            (
                "reliability_bulk_runs_total",
                "Bulk operations executed",
                snapshot.bulk_runs_total,
            ),
            (
                "reliability_bulk_items_total",
                "Items processed by bulk operations",
                snapshot.bulk_items_total,
            ),
            (
                "reliability_webhooks_received_total",
                "Webhook deliveries received",
                snapshot.webhooks_received,
            ),
            (
                "reliability_webhooks_valid_total",
                "Webhook deliveries that passed validation",
                snapshot.webhooks_valid,
            ),
            (
                "reliability_webhooks_rejected_total",
                "Webhook deliveries rejected by a hard check",
                snapshot.webhooks_rejected,
            ),
            (
                "reliability_webhooks_flagged_total",
                "Webhook deliveries carrying threat indicators",
                snapshot.webhooks_flagged,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        output.push_str("# HELP reliability_avg_response_time_ms Mean attempt-inclusive call time\n");
        output.push_str("# TYPE reliability_avg_response_time_ms gauge\n");
        output.push_str(&format!(
            "reliability_avg_response_time_ms {:.3}\n",
            snapshot.avg_response_time_ms
        ));
        output.push_str("# HELP reliability_uptime_seconds Service uptime\n");
        output.push_str("# TYPE reliability_uptime_seconds gauge\n");
        output.push_str(&format!(
            "reliability_uptime_seconds {}\n",
            snapshot.uptime_seconds
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiCallResult, ProviderId, ProviderResponse, RateLimitInfo};
    use pretty_assertions::assert_eq;

    fn ok_outcome() -> CallOutcome {
        CallOutcome::Ok(ApiCallResult::succeeded(
            ProviderId::Payments,
            ProviderResponse::ok(),
            2,
            0.25,
            "closed".to_string(),
        ))
    }

    #[test]
    fn test_call_outcomes_update_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_call(&ok_outcome());
        metrics.record_call(&CallOutcome::Failed(ApiCallResult::failed(
            ProviderId::Sms,
            "All 3 attempts failed".to_string(),
            Some(503),
            3,
            0.75,
            "closed".to_string(),
        )));
        metrics.record_call(&CallOutcome::CircuitOpen {
            provider: ProviderId::Sms,
            retry_after: 30.0,
        });
        metrics.record_call(&CallOutcome::RateLimited {
            provider: ProviderId::Email,
            info: RateLimitInfo::unlimited(),
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.calls_total, 4);
        assert_eq!(snapshot.calls_succeeded, 1);
        assert_eq!(snapshot.calls_failed, 1);
        assert_eq!(snapshot.calls_rejected_circuit, 1);
        assert_eq!(snapshot.calls_rejected_rate_limit, 1);
        assert_eq!(snapshot.attempts_total, 5);
        assert!((snapshot.avg_response_time_ms - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_webhook_counters() {
        let metrics = ServiceMetrics::new();
        let mut valid = crate::models::WebhookValidationResult {
            is_valid: true,
            event_id: None,
            event_type: None,
            security_score: 1.0,
            ip_reputation: crate::models::IpReputation::Neutral,
            error_message: None,
            rate_limit_info: None,
            threat_indicators: Vec::new(),
        };
        metrics.record_webhook(&valid);
        valid.threat_indicators.push("duplicate_delivery".to_string());
        metrics.record_webhook(&valid);
        metrics.record_webhook(&crate::models::WebhookValidationResult::rejected(
            "bad signature",
            crate::models::IpReputation::Neutral,
        ));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.webhooks_received, 3);
        assert_eq!(snapshot.webhooks_valid, 2);
        assert_eq!(snapshot.webhooks_rejected, 1);
        assert_eq!(snapshot.webhooks_flagged, 1);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = ServiceMetrics::new();
        metrics.record_call(&ok_outcome());

        let text = metrics.to_prometheus_format();
        assert!(text.contains("# TYPE reliability_calls_total counter"));
        assert!(text.contains("reliability_calls_total 1"));
        assert!(text.contains("reliability_calls_succeeded_total 1"));
        assert!(text.contains("# TYPE reliability_uptime_seconds gauge"));
        assert!(text.contains("reliability_avg_response_time_ms 250.000"));
    }
}
