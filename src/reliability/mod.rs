//! Outbound reliability pipeline
//!
//! Wraps caller-supplied provider operations with the full protection stack:
//! rate limiting at the entry point (handled by the service facade), circuit
//! breaking before every attempt, retries with configurable backoff between
//! attempts, and health sample recording for each attempt outcome.

pub mod bulk;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use bulk::{BulkConfig, BulkExecutor};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterStats};
pub use retry::{BackoffStrategy, RetryPolicy};

use crate::health::HealthAggregator;
use crate::models::{ApiCallResult, AttemptError, CallOutcome, ProviderId, ProviderResponse};
use std::future::Future;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Run one logical call through the breaker/retry pipeline.
///
/// The breaker is consulted before every attempt: a rejection before the
/// first attempt surfaces as `CallOutcome::CircuitOpen` without consuming any
/// retry budget, while a circuit that opens mid-run aborts the remaining
/// attempts. Every attempt outcome is reported to the breaker and the health
/// aggregator. A nominally successful response whose status code is in the
/// policy's retryable set counts as a failed attempt; an error the policy
/// does not retry fails the call immediately.
#[instrument(level = "debug", skip_all, fields(provider = %provider, operation = operation))]
pub(crate) async fn execute_with_retry<F, Fut>(
    provider: ProviderId,
    operation: &str,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    health: &HealthAggregator,
    call: F,
) -> CallOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<ProviderResponse, AttemptError>>,
{
    let started = Instant::now();
    let mut last_error: Option<AttemptError> = None;

    for attempt in 1..=policy.max_attempts {
        if !breaker.can_execute() {
            if attempt == 1 {
                debug!(retry_after_secs = breaker.retry_after_secs(), "Call rejected, circuit open");
                return CallOutcome::CircuitOpen {
                    provider,
                    retry_after: breaker.retry_after_secs(),
                };
            }
            let attempts_made = attempt - 1;
            let message = match &last_error {
                Some(error) => format!(
                    "circuit breaker opened for {} after {} attempt(s): {}",
                    provider, attempts_made, error
                ),
                None => format!(
                    "circuit breaker opened for {} after {} attempt(s)",
                    provider, attempts_made
                ),
            };
            warn!(attempts = attempts_made, "Call aborted, circuit opened mid-run");
            return CallOutcome::Failed(ApiCallResult::failed(
                provider,
                message,
                last_error.as_ref().and_then(|e| e.status_code),
                attempts_made,
                started.elapsed().as_secs_f64(),
                breaker.current_state().as_str().to_string(),
            ));
        }

        let attempt_started = Instant::now();
        let outcome = call().await;
        let elapsed_ms = attempt_started.elapsed().as_secs_f64() * 1000.0;

        let error = match outcome {
            Ok(response) => match response.status_code {
                Some(code) if policy.is_retryable_status(code) => {
                    AttemptError::server(code, format!("provider returned status {}", code))
                }
                _ => {
                    breaker.record_success();
                    health.record(provider, true, elapsed_ms);
                    debug!(attempt, elapsed_ms, "Call succeeded");
                    return CallOutcome::Ok(ApiCallResult::succeeded(
                        provider,
                        response,
                        attempt,
                        started.elapsed().as_secs_f64(),
                        breaker.current_state().as_str().to_string(),
                    ));
                }
            },
            Err(error) => error,
        };

        breaker.record_failure();
        health.record(provider, false, elapsed_ms);
        warn!(attempt, error = %error, "Attempt failed");

        if !policy.should_retry(&error) {
            debug!(attempt, "Error is not retryable, failing call");
            return CallOutcome::Failed(ApiCallResult::failed(
                provider,
                error.to_string(),
                error.status_code,
                attempt,
                started.elapsed().as_secs_f64(),
                breaker.current_state().as_str().to_string(),
            ));
        }

        last_error = Some(error);
        if attempt < policy.max_attempts {
            let delay = policy.delay_after_attempt(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before next attempt");
                sleep(delay).await;
            }
        }
    }

    let message = match &last_error {
        Some(error) => format!("All {} attempts failed: {}", policy.max_attempts, error),
        None => format!("All {} attempts failed", policy.max_attempts),
    };
    CallOutcome::Failed(ApiCallResult::failed(
        provider,
        message,
        last_error.as_ref().and_then(|e| e.status_code),
        policy.max_attempts,
        started.elapsed().as_secs_f64(),
        breaker.current_state().as_str().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: 0.01,
            max_delay: 0.05,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn breaker(provider: ProviderId) -> CircuitBreaker {
        CircuitBreaker::new(provider, CircuitBreakerConfig::default())
    }

    fn health() -> HealthAggregator {
        HealthAggregator::new(Duration::from_secs(300))
    }

    fn counting_call(
        calls: Arc<AtomicU32>,
        fail_first: u32,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<ProviderResponse, AttemptError>> + Send>>
    {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    Err(AttemptError::server(503, "temporarily unavailable"))
                } else {
                    Ok(ProviderResponse::ok())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = execute_with_retry(
            ProviderId::Email,
            "send_email",
            &fast_policy(3),
            &breaker(ProviderId::Email),
            &health(),
            counting_call(calls.clone(), 0),
        )
        .await;

        let result = outcome.into_result();
        assert!(result.success);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_reports_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let health = health();
        let breaker = breaker(ProviderId::Payments);
        let outcome = execute_with_retry(
            ProviderId::Payments,
            "charge",
            &fast_policy(3),
            &breaker,
            &health,
            counting_call(calls.clone(), 2),
        )
        .await;

        assert!(outcome.is_ok());
        let result = outcome.into_result();
        assert!(result.success);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        let metrics = health.metrics(ProviderId::Payments).unwrap();
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_aggregate_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = execute_with_retry(
            ProviderId::Sms,
            "send_sms",
            &fast_policy(3),
            &breaker(ProviderId::Sms),
            &health(),
            counting_call(calls.clone(), u32::MAX),
        )
        .await;

        let result = outcome.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("All 3 attempts failed"));
        assert_eq!(result.status_code, Some(503));
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_call = calls.clone();
        let outcome = execute_with_retry(
            ProviderId::Calendar,
            "create_event",
            &fast_policy(5),
            &breaker(ProviderId::Calendar),
            &health(),
            move || {
                let calls = calls_in_call.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::client(422, "invalid event payload"))
                }
            },
        )
        .await;

        let result = outcome.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.status_code, Some(422));
    }

    #[tokio::test]
    async fn test_retryable_status_on_success_counts_as_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_call = calls.clone();
        let outcome = execute_with_retry(
            ProviderId::Generic,
            "sync",
            &fast_policy(2),
            &breaker(ProviderId::Generic),
            &health(),
            move || {
                let calls = calls_in_call.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ProviderResponse::with_status(503, None))
                }
            },
        )
        .await;

        let result = outcome.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("All 2 attempts failed"));
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let breaker = breaker(ProviderId::Payments);
        breaker.force_open();

        let outcome = execute_with_retry(
            ProviderId::Payments,
            "charge",
            &fast_policy(3),
            &breaker,
            &health(),
            counting_call(calls.clone(), 0),
        )
        .await;

        assert!(matches!(outcome, CallOutcome::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_run_aborts_remaining_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let breaker = CircuitBreaker::new(
            ProviderId::Sms,
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout: 60.0,
            },
        );

        let outcome = execute_with_retry(
            ProviderId::Sms,
            "send_sms",
            &fast_policy(5),
            &breaker,
            &health(),
            counting_call(calls.clone(), u32::MAX),
        )
        .await;

        let result = outcome.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("circuit breaker opened"));
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_sleeps() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: 5.0,
            max_delay: 10.0,
            jitter: false,
            ..RetryPolicy::default()
        };

        let started = Instant::now();
        let outcome = execute_with_retry(
            ProviderId::Email,
            "send_email",
            &policy,
            &breaker(ProviderId::Email),
            &health(),
            counting_call(calls.clone(), u32::MAX),
        )
        .await;

        let result = outcome.into_result();
        assert!(!result.success);
        assert_eq!(result.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_status_outside_retry_set_is_success() {
        let policy = RetryPolicy {
            retry_on_status: HashSet::from([500, 503]),
            ..fast_policy(3)
        };
        let outcome = execute_with_retry(
            ProviderId::Generic,
            "sync",
            &policy,
            &breaker(ProviderId::Generic),
            &health(),
            || async { Ok(ProviderResponse::with_status(204, None)) },
        )
        .await;

        let result = outcome.into_result();
        assert!(result.success);
        assert_eq!(result.status_code, Some(204));
        assert_eq!(result.attempt_count, 1);
    }
}
