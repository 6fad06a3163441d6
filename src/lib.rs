//! # Reliability Service
//!
//! A reliability and webhook-security layer for outbound provider
//! integrations: payment processors, SMS and email gateways, calendar
//! APIs and generic HTTP partners.
//!
//! ## Features
//!
//! - **Retries**: Configurable backoff (fixed, linear, exponential,
//!   fibonacci) with jitter and per-policy retryable status/error sets
//! - **Circuit Breakers**: Per-provider closed/open/half-open breakers with
//!   cooldown probes and administrative reset
//! - **Rate Limiting**: Non-blocking sliding-window limiter with burst
//!   allowance and priority multipliers
//! - **Bulk Execution**: Concurrent batching with adaptive batch sizing,
//!   every item running through the full pipeline
//! - **Webhook Security**: Source allow-lists, HMAC signature verification,
//!   replay suppression, payload heuristics and source reputation
//! - **Health Monitoring**: Rolling per-provider metrics, SLA evaluation
//!   and an aggregated report with alerts
//!
//! ## Architecture
//!
//! [`ReliabilityService`] is the dependency context everything hangs off;
//! construct it from a [`ServiceConfig`] (or directly around a
//! [`store::KeyValueStore`]) and register each provider class once. Expected
//! failure modes (exhausted retries, open circuits, rate limits) come back
//! as [`CallOutcome`] variants rather than errors, so callers can branch on
//! them without string matching.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reliability_service::{ReliabilityServer, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let server = ReliabilityServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod reliability;
pub mod service;
pub mod store;
pub mod webhook;

// Re-export main types for easier usage
pub use config::ServiceConfig;
pub use error::{ReliabilityError, ReliabilityResult};
pub use models::{
    ApiCallResult, AttemptError, BulkOperationResult, CallOutcome, HealthReport, HealthStatus,
    IpReputation, Priority, ProviderId, ProviderResponse, RateLimitInfo, WebhookValidationResult,
};
pub use providers::{ProviderRegistry, ProviderSettings};
pub use reliability::{
    BackoffStrategy, BulkConfig, CircuitBreakerConfig, CircuitState, RateLimitConfig, RetryPolicy,
};
pub use service::{AppState, ReliabilityServer, ReliabilityService};
pub use webhook::{SignatureConfig, SignatureScheme, WebhookValidator};

/// Version information for the reliability service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "reliability-service";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(SERVICE_NAME, "reliability-service");
    }

    #[test]
    fn test_provider_classes_are_exported() {
        assert_eq!(ProviderId::ALL.len(), 5);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
