//! Data models for the reliability service
//!
//! This module defines the shared data structures used across the outbound
//! reliability pipeline and the inbound webhook validation path: provider
//! identities, call outcomes, bulk operation results, webhook validation
//! results, and health reporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// External provider addressed through the reliability layer.
///
/// Used as the partition key for all per-provider state (circuit breaker,
/// rate-limit windows, health samples). Statically defined - providers are
/// not created or deleted at runtime.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Payments,
    Sms,
    Email,
    Calendar,
    Generic,
}

impl ProviderId {
    /// All known providers, in declaration order.
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Payments,
        ProviderId::Sms,
        ProviderId::Email,
        ProviderId::Calendar,
        ProviderId::Generic,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Payments => "payments",
            ProviderId::Sms => "sms",
            ProviderId::Email => "email",
            ProviderId::Calendar => "calendar",
            ProviderId::Generic => "generic",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "payments" => Ok(ProviderId::Payments),
            "sms" => Ok(ProviderId::Sms),
            "email" => Ok(ProviderId::Email),
            "calendar" => Ok(ProviderId::Calendar),
            "generic" => Ok(ProviderId::Generic),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request priority, consulted by the rate limiter when capacity is contended.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a failed call attempt, used by retry policies to decide
/// whether the failure is worth another attempt.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The attempt exceeded its deadline.
    Timeout,
    /// Connection-level failure (DNS, refused, reset).
    Connection,
    /// Provider-side error (5xx-shaped).
    Server,
    /// Request-side error (4xx-shaped); usually permanent.
    Client,
    /// Anything that does not fit the categories above.
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Server => "server",
            FailureKind::Client => "client",
            FailureKind::Other => "other",
        };
        write!(f, "{}", kind)
    }
}

/// Successful return of a caller-supplied provider operation.
///
/// The payload is opaque to the reliability layer; only the status code is
/// inspected (against the policy's retryable status set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// HTTP-shaped status code, when the operation has one.
    pub status_code: Option<u16>,
    /// Opaque response payload.
    pub data: Option<Value>,
}

impl ProviderResponse {
    /// A bare success with no payload.
    pub fn ok() -> Self {
        Self {
            status_code: Some(200),
            data: None,
        }
    }

    /// A success carrying a JSON payload.
    pub fn with_data(data: Value) -> Self {
        Self {
            status_code: Some(200),
            data: Some(data),
        }
    }

    /// A success with an explicit status code.
    pub fn with_status(status_code: u16, data: Option<Value>) -> Self {
        Self {
            status_code: Some(status_code),
            data,
        }
    }
}

/// Failed attempt of a caller-supplied provider operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptError {
    /// Failure classification used for retry decisions.
    pub kind: FailureKind,
    /// Status code when the failure was HTTP-shaped.
    pub status_code: Option<u16>,
    /// Human-readable error detail.
    pub message: String,
}

impl AttemptError {
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Timeout,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Connection,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn server<S: Into<String>>(status_code: u16, message: S) -> Self {
        Self {
            kind: FailureKind::Server,
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    pub fn client<S: Into<String>>(status_code: u16, message: S) -> Self {
        Self {
            kind: FailureKind::Client,
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Other,
            status_code: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Final result of one logical call through the reliability pipeline.
///
/// Immutable once returned. Expected failure modes (exhausted retries,
/// circuit open, rate limited) are reported through this structure rather
/// than as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallResult {
    /// Whether the call ultimately succeeded.
    pub success: bool,
    /// Status code from the final attempt, when available.
    pub status_code: Option<u16>,
    /// Payload from the successful attempt.
    pub data: Option<Value>,
    /// Error detail when the call failed.
    pub error: Option<String>,
    /// Elapsed wall time for the whole logical call, in seconds.
    pub response_time: f64,
    /// Number of attempts performed (0 when rejected before any attempt).
    pub attempt_count: u32,
    /// Provider the call was addressed to.
    pub provider: ProviderId,
    /// Circuit breaker state observed at completion ("closed", "open", "half_open").
    pub circuit_breaker_state: String,
    /// Whether the result was served from a cache rather than a live attempt.
    pub cached: bool,
}

impl ApiCallResult {
    /// Build a success result.
    pub fn succeeded(
        provider: ProviderId,
        response: ProviderResponse,
        attempt_count: u32,
        response_time: f64,
        circuit_breaker_state: String,
    ) -> Self {
        Self {
            success: true,
            status_code: response.status_code,
            data: response.data,
            error: None,
            response_time,
            attempt_count,
            provider,
            circuit_breaker_state,
            cached: false,
        }
    }

    /// Build a failure result.
    pub fn failed(
        provider: ProviderId,
        error: String,
        status_code: Option<u16>,
        attempt_count: u32,
        response_time: f64,
        circuit_breaker_state: String,
    ) -> Self {
        Self {
            success: false,
            status_code,
            data: None,
            error: Some(error),
            response_time,
            attempt_count,
            provider,
            circuit_breaker_state,
            cached: false,
        }
    }
}

/// Outcome of a gated call, as data rather than control flow.
///
/// Callers match on the variant: `Ok` and `Failed` carry the full call
/// result, while `CircuitOpen` and `RateLimited` are pre-attempt rejections
/// that consumed no retry budget.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The operation succeeded within the retry budget.
    Ok(ApiCallResult),
    /// Rejected before any attempt: the provider's circuit is open.
    CircuitOpen {
        provider: ProviderId,
        /// Seconds until the breaker will admit a probe.
        retry_after: f64,
    },
    /// Rejected before any attempt: the provider's rate budget is exhausted.
    RateLimited {
        provider: ProviderId,
        info: RateLimitInfo,
    },
    /// All attempts failed, or the failure was permanent.
    Failed(ApiCallResult),
}

impl CallOutcome {
    /// Whether the call ultimately succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok(_))
    }

    /// Canonical HTTP status for surfacing this outcome to a caller.
    pub fn http_status(&self) -> u16 {
        match self {
            CallOutcome::Ok(result) => result.status_code.unwrap_or(200),
            CallOutcome::CircuitOpen { .. } => 503,
            CallOutcome::RateLimited { .. } => 429,
            CallOutcome::Failed(result) => result.status_code.unwrap_or(502),
        }
    }

    /// Flatten the outcome into the caller-facing result shape.
    pub fn into_result(self) -> ApiCallResult {
        match self {
            CallOutcome::Ok(result) | CallOutcome::Failed(result) => result,
            CallOutcome::CircuitOpen {
                provider,
                retry_after,
            } => ApiCallResult {
                success: false,
                status_code: None,
                data: None,
                error: Some(format!(
                    "circuit breaker is open for {} (retry in {:.1}s)",
                    provider, retry_after
                )),
                response_time: 0.0,
                attempt_count: 0,
                provider,
                circuit_breaker_state: "open".to_string(),
                cached: false,
            },
            CallOutcome::RateLimited { provider, info } => ApiCallResult {
                success: false,
                status_code: None,
                data: serde_json::to_value(&info).ok(),
                error: Some(format!(
                    "rate limit exceeded for {} ({} window)",
                    provider, info.window
                )),
                response_time: 0.0,
                attempt_count: 0,
                provider,
                circuit_breaker_state: "closed".to_string(),
                cached: false,
            },
        }
    }
}

/// Remaining-quota information attached to rate-limit decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Effective ceiling for the violated (or tightest) window.
    pub limit: u32,
    /// Requests still available in that window.
    pub remaining: u32,
    /// Seconds until a slot frees up; 0 when allowed.
    pub retry_after: f64,
    /// Which window produced the decision ("second", "minute").
    pub window: String,
}

impl RateLimitInfo {
    /// An unconstrained admission (limiter disabled or untracked).
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            retry_after: 0.0,
            window: "none".to_string(),
        }
    }
}

/// Per-item failure recorded in a bulk result. Only the first few failures
/// carry detail; `failed_items` counts them all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Index of the item in the original input list.
    pub item_index: usize,
    /// Error detail for that item.
    pub error: String,
}

/// Aggregated result of one bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationResult {
    /// Number of items submitted.
    pub total_items: usize,
    /// Items whose pipeline call succeeded.
    pub successful_items: usize,
    /// Items whose pipeline call failed (including rejections).
    pub failed_items: usize,
    /// successful_items / total_items, 0.0 for an empty input.
    pub success_rate: f64,
    /// Elapsed wall time for the whole bulk run, in seconds.
    pub total_time: f64,
    /// Mean per-item response time, in seconds.
    pub average_response_time: f64,
    /// First failures in input order, capped to a fixed bound.
    pub errors: Vec<BulkItemError>,
    /// Batch size the run was partitioned with.
    pub batch_size_used: usize,
    /// Per-item results in original input order.
    pub results: Vec<ApiCallResult>,
}

impl BulkOperationResult {
    /// The immediate result for an empty input: nothing was attempted and no
    /// gate was consulted.
    pub fn empty(batch_size: usize) -> Self {
        Self {
            total_items: 0,
            successful_items: 0,
            failed_items: 0,
            success_rate: 0.0,
            total_time: 0.0,
            average_response_time: 0.0,
            errors: Vec::new(),
            batch_size_used: batch_size,
            results: Vec::new(),
        }
    }
}

/// Reputation classification for a webhook source address, derived from
/// historical validation outcomes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IpReputation {
    Trusted,
    Neutral,
    Suspicious,
    Blocked,
}

impl IpReputation {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IpReputation::Trusted => "trusted",
            IpReputation::Neutral => "neutral",
            IpReputation::Suspicious => "suspicious",
            IpReputation::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for IpReputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of validating one inbound webhook. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookValidationResult {
    /// True only when every hard check (source IP, signature, block list)
    /// passed. Soft signals never flip this to false.
    pub is_valid: bool,
    /// Event identifier extracted from the payload, when parseable.
    pub event_id: Option<String>,
    /// Event type extracted from the payload, when parseable.
    pub event_type: Option<String>,
    /// Composite confidence score in [0, 1]; product of per-check multipliers.
    pub security_score: f64,
    /// Reputation of the source address at validation time.
    pub ip_reputation: IpReputation,
    /// Reason for rejection when a hard check failed.
    pub error_message: Option<String>,
    /// Inbound per-IP rate window state for this request.
    pub rate_limit_info: Option<RateLimitInfo>,
    /// Soft signals accumulated while validating (duplicates, oversized
    /// payloads, injection markers, rapid-fire sources).
    pub threat_indicators: Vec<String>,
}

impl WebhookValidationResult {
    /// Build a hard rejection with the score floored to zero.
    pub fn rejected<S: Into<String>>(reason: S, ip_reputation: IpReputation) -> Self {
        Self {
            is_valid: false,
            event_id: None,
            event_type: None,
            security_score: 0.0,
            ip_reputation,
            error_message: Some(reason.into()),
            rate_limit_info: None,
            threat_indicators: Vec::new(),
        }
    }

    /// Whether a replayed payload was detected for this delivery.
    pub fn is_duplicate(&self) -> bool {
        self.threat_indicators
            .iter()
            .any(|i| i.starts_with("duplicate"))
    }
}

/// Health classification for a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All metrics within SLA thresholds.
    Healthy,
    /// Thresholds exceeded, but within the degraded band.
    Degraded,
    /// Severely out of threshold.
    Unhealthy,
    /// No samples recorded yet.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{}", status)
    }
}

/// Rolling health metrics for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Provider these metrics belong to.
    pub provider: ProviderId,
    /// Cumulative successes since process start.
    pub success_count: u64,
    /// Cumulative failures since process start.
    pub failure_count: u64,
    /// Mean response time over the rolling window, in milliseconds.
    pub avg_response_time_ms: f64,
    /// Failure percentage over the rolling window.
    pub error_rate_percent: f64,
    /// Success percentage over the rolling window.
    pub success_rate_percent: f64,
    /// Availability percentage over the rolling window.
    pub availability_percent: f64,
    /// Most recent successful call.
    pub last_success: Option<DateTime<Utc>>,
    /// Most recent failed call.
    pub last_failure: Option<DateTime<Utc>>,
    /// Samples currently inside the rolling window.
    pub window_samples: usize,
}

/// Per-provider entry in a health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthSummary {
    /// Health classification.
    pub status: HealthStatus,
    /// Rolling metrics backing the classification.
    pub metrics: HealthMetrics,
    /// Whether all SLA thresholds hold simultaneously.
    pub sla_compliant: bool,
    /// Circuit breaker state ("closed", "open", "half_open").
    pub circuit_state: String,
    /// Fraction of the outbound minute budget currently consumed.
    pub rate_limit_utilization: f64,
}

/// Aggregated health report across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Worst status across the included providers.
    pub overall_status: HealthStatus,
    /// Per-provider summaries, keyed by provider name.
    pub providers: HashMap<String, ProviderHealthSummary>,
    /// Active alerts (open circuits, unhealthy providers).
    pub alerts: Vec<String>,
    /// Operator-facing suggestions derived from the alerts.
    pub recommendations: Vec<String>,
}

impl HealthReport {
    /// Report covering no providers at all.
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            overall_status: HealthStatus::Unknown,
            providers: HashMap::new(),
            alerts: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// API response for webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Request ID for tracking.
    pub request_id: String,
    /// Response status: accepted, rejected or error.
    pub status: String,
    /// Response message.
    pub message: String,
    /// Processing timestamp.
    pub timestamp: DateTime<Utc>,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WebhookResponse {
    /// Envelope for a delivery that passed validation.
    pub fn accepted(request_id: String, result: &WebhookValidationResult) -> Self {
        Self {
            request_id,
            status: "accepted".to_string(),
            message: "webhook validated".to_string(),
            timestamp: Utc::now(),
            data: Some(serde_json::json!({
                "event_id": result.event_id,
                "event_type": result.event_type,
                "security_score": result.security_score,
                "threat_indicators": result.threat_indicators,
            })),
        }
    }

    /// Envelope for a delivery that failed validation.
    pub fn rejected(request_id: String, result: &WebhookValidationResult) -> Self {
        Self {
            request_id,
            status: "rejected".to_string(),
            message: result
                .error_message
                .clone()
                .unwrap_or_else(|| "validation failed".to_string()),
            timestamp: Utc::now(),
            data: Some(serde_json::json!({
                "ip_reputation": result.ip_reputation,
                "threat_indicators": result.threat_indicators,
            })),
        }
    }

    /// Envelope for a request that never reached validation.
    pub fn error(request_id: String, message: String) -> Self {
        Self {
            request_id,
            status: "error".to_string(),
            message,
            timestamp: Utc::now(),
            data: None,
        }
    }
}

/// Response body for the service-level health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Overall status.
    pub status: HealthStatus,
    /// Status per registered provider.
    pub providers: HashMap<String, HealthStatus>,
    /// Seconds since the service started.
    pub uptime_seconds: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_provider_id_conversions() {
        assert_eq!(ProviderId::Payments.as_str(), "payments");
        assert_eq!(ProviderId::Sms.as_str(), "sms");
        assert_eq!(ProviderId::Calendar.as_str(), "calendar");

        assert_eq!(ProviderId::parse("payments").unwrap(), ProviderId::Payments);
        assert_eq!(ProviderId::parse("EMAIL").unwrap(), ProviderId::Email);
        assert_eq!(ProviderId::parse("Generic").unwrap(), ProviderId::Generic);
        assert!(ProviderId::parse("fax").is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_call_outcome_flattening() {
        let open = CallOutcome::CircuitOpen {
            provider: ProviderId::Payments,
            retry_after: 45.0,
        };
        let result = open.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 0);
        assert_eq!(result.circuit_breaker_state, "open");
        assert!(result.error.unwrap().contains("circuit breaker is open"));

        let limited = CallOutcome::RateLimited {
            provider: ProviderId::Sms,
            info: RateLimitInfo {
                allowed: false,
                limit: 10,
                remaining: 0,
                retry_after: 0.4,
                window: "second".to_string(),
            },
        };
        let result = limited.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 0);
        assert!(result.error.unwrap().contains("rate limit exceeded"));
        assert!(result.data.is_some());
    }

    #[test]
    fn test_api_call_result_builders() {
        let ok = ApiCallResult::succeeded(
            ProviderId::Email,
            ProviderResponse::with_data(serde_json::json!({"sent": true})),
            2,
            0.12,
            "closed".to_string(),
        );
        assert!(ok.success);
        assert_eq!(ok.attempt_count, 2);
        assert_eq!(ok.status_code, Some(200));

        let failed = ApiCallResult::failed(
            ProviderId::Email,
            "All 3 attempts failed".to_string(),
            Some(503),
            3,
            1.5,
            "closed".to_string(),
        );
        assert!(!failed.success);
        assert_eq!(failed.attempt_count, 3);
        assert_eq!(failed.error.as_deref(), Some("All 3 attempts failed"));
    }

    #[test]
    fn test_bulk_empty_result() {
        let result = BulkOperationResult::empty(25);
        assert_eq!(result.total_items, 0);
        assert_eq!(result.successful_items, 0);
        assert_eq!(result.failed_items, 0);
        assert_eq!(result.success_rate, 0.0);
        assert_eq!(result.batch_size_used, 25);
        assert!(result.results.is_empty());
    }

    #[test]
    fn test_webhook_rejection_floors_score() {
        let result = WebhookValidationResult::rejected("bad signature", IpReputation::Neutral);
        assert!(!result.is_valid);
        assert_eq!(result.security_score, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("bad signature"));
        assert!(!result.is_duplicate());
    }

    #[test]
    fn test_serialization_round_trip() {
        let result = ApiCallResult::succeeded(
            ProviderId::Payments,
            ProviderResponse::ok(),
            1,
            0.05,
            "closed".to_string(),
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: ApiCallResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider, ProviderId::Payments);
        assert!(back.success);
        assert!(json.contains("\"payments\""));
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
        assert_eq!(HealthStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_ip_reputation_display() {
        assert_eq!(IpReputation::Trusted.to_string(), "trusted");
        assert_eq!(IpReputation::Blocked.to_string(), "blocked");
    }
}
