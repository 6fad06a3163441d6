//! Provider registration
//!
//! Each provider is registered with a complete settings bundle: retry
//! policy, circuit breaker, outbound rate limits, bulk execution, SLA
//! thresholds and (when the provider pushes webhooks) signature settings.
//! Defaults per provider class live in one table; registration is the only
//! place configuration mistakes surface as errors.

use crate::error::{ReliabilityError, ReliabilityResult};
use crate::health::SlaThresholds;
use crate::models::ProviderId;
use crate::reliability::bulk::BulkConfig;
use crate::reliability::circuit_breaker::CircuitBreakerConfig;
use crate::reliability::rate_limiter::RateLimitConfig;
use crate::reliability::retry::{BackoffStrategy, RetryPolicy};
use crate::webhook::validator::SignatureConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Complete per-provider configuration bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub bulk: BulkConfig,
    pub sla: SlaThresholds,
    /// Webhook signature settings; `None` for providers that never push.
    pub signature: Option<SignatureConfig>,
}

impl ProviderSettings {
    /// Default settings per provider class.
    ///
    /// Payment traffic gets the widest retry budget and the longest breaker
    /// cooldown since those calls move money and their provider throttles
    /// aggressively. Messaging is in between; calendar and generic traffic
    /// use the lean defaults.
    pub fn defaults_for(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Payments => Self {
                retry: RetryPolicy {
                    max_attempts: 5,
                    base_delay: 2.0,
                    ..RetryPolicy::default()
                },
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 5,
                    success_threshold: 2,
                    timeout: 45.0,
                },
                rate_limit: RateLimitConfig {
                    requests_per_second: 25,
                    requests_per_minute: 1000,
                    burst_allowance: 10,
                    ..RateLimitConfig::default()
                },
                bulk: BulkConfig::default(),
                sla: SlaThresholds {
                    response_time_ms: 400.0,
                    error_rate_percent: 0.5,
                    ..SlaThresholds::default()
                },
                signature: None,
            },
            ProviderId::Sms => Self {
                retry: RetryPolicy {
                    max_attempts: 4,
                    base_delay: 1.5,
                    ..RetryPolicy::default()
                },
                circuit_breaker: CircuitBreakerConfig::default(),
                rate_limit: RateLimitConfig {
                    requests_per_second: 10,
                    requests_per_minute: 300,
                    burst_allowance: 5,
                    ..RateLimitConfig::default()
                },
                bulk: BulkConfig {
                    batch_size: 25,
                    ..BulkConfig::default()
                },
                sla: SlaThresholds::default(),
                signature: None,
            },
            ProviderId::Email => Self {
                retry: RetryPolicy {
                    max_attempts: 4,
                    base_delay: 1.5,
                    ..RetryPolicy::default()
                },
                circuit_breaker: CircuitBreakerConfig::default(),
                rate_limit: RateLimitConfig {
                    requests_per_second: 20,
                    requests_per_minute: 600,
                    burst_allowance: 10,
                    ..RateLimitConfig::default()
                },
                bulk: BulkConfig {
                    batch_size: 100,
                    max_batch_size: 500,
                    ..BulkConfig::default()
                },
                sla: SlaThresholds::default(),
                signature: None,
            },
            ProviderId::Calendar => Self {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: 1.0,
                    ..RetryPolicy::default()
                },
                circuit_breaker: CircuitBreakerConfig::default(),
                rate_limit: RateLimitConfig {
                    requests_per_second: 10,
                    requests_per_minute: 500,
                    burst_allowance: 5,
                    ..RateLimitConfig::default()
                },
                bulk: BulkConfig {
                    batch_size: 20,
                    ..BulkConfig::default()
                },
                sla: SlaThresholds::default(),
                signature: None,
            },
            ProviderId::Generic => Self {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: 1.0,
                    strategy: BackoffStrategy::Exponential,
                    ..RetryPolicy::default()
                },
                circuit_breaker: CircuitBreakerConfig::default(),
                rate_limit: RateLimitConfig::default(),
                bulk: BulkConfig::default(),
                sla: SlaThresholds::default(),
                signature: None,
            },
        }
    }

    /// Defaults plus a webhook signing secret.
    pub fn defaults_with_secret(provider: ProviderId, secret: impl Into<String>) -> Self {
        Self {
            signature: Some(SignatureConfig::default_for(provider, secret)),
            ..Self::defaults_for(provider)
        }
    }

    /// Check every sub-configuration. Returns the first mistake found.
    pub fn validate(&self) -> Result<(), String> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;
        self.bulk.validate()?;
        self.sla.validate()?;
        if let Some(signature) = &self.signature {
            signature.validate()?;
        }
        Ok(())
    }
}

/// Registered providers and their settings.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderId, Arc<ProviderSettings>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a provider. The only way configuration
    /// mistakes surface as errors; call-time paths assume valid settings.
    pub fn register(
        &self,
        provider: ProviderId,
        settings: ProviderSettings,
    ) -> ReliabilityResult<Arc<ProviderSettings>> {
        settings
            .validate()
            .map_err(|message| ReliabilityError::invalid_policy(provider.as_str(), message))?;
        let settings = Arc::new(settings);
        self.providers.write().insert(provider, settings.clone());
        info!(
            provider = %provider,
            max_attempts = settings.retry.max_attempts,
            failure_threshold = settings.circuit_breaker.failure_threshold,
            "Registered provider"
        );
        Ok(settings)
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<ProviderSettings>> {
        self.providers.read().get(&provider).cloned()
    }

    /// Settings for a provider, or `UnknownProvider` when it was never
    /// registered.
    pub fn require(&self, provider: ProviderId) -> ReliabilityResult<Arc<ProviderSettings>> {
        self.get(provider)
            .ok_or_else(|| ReliabilityError::unknown_provider(provider.as_str()))
    }

    pub fn is_registered(&self, provider: ProviderId) -> bool {
        self.providers.read().contains_key(&provider)
    }

    /// Registered providers in declaration order.
    pub fn registered(&self) -> Vec<ProviderId> {
        let providers = self.providers.read();
        ProviderId::ALL
            .into_iter()
            .filter(|p| providers.contains_key(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_table_per_provider_class() {
        let payments = ProviderSettings::defaults_for(ProviderId::Payments);
        assert_eq!(payments.retry.max_attempts, 5);
        assert!((payments.retry.base_delay - 2.0).abs() < f64::EPSILON);
        assert!((payments.circuit_breaker.timeout - 45.0).abs() < f64::EPSILON);

        let sms = ProviderSettings::defaults_for(ProviderId::Sms);
        assert_eq!(sms.retry.max_attempts, 4);
        assert!((sms.retry.base_delay - 1.5).abs() < f64::EPSILON);

        let calendar = ProviderSettings::defaults_for(ProviderId::Calendar);
        assert_eq!(calendar.retry.max_attempts, 3);
        assert!((calendar.retry.base_delay - 1.0).abs() < f64::EPSILON);

        for provider in ProviderId::ALL {
            assert!(ProviderSettings::defaults_for(provider).validate().is_ok());
        }
    }

    #[test]
    fn test_defaults_with_secret_enable_webhooks() {
        let settings = ProviderSettings::defaults_with_secret(ProviderId::Payments, "whsec_x");
        assert!(settings.signature.is_some());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_registration_rejects_invalid_settings() {
        let registry = ProviderRegistry::new();
        let mut settings = ProviderSettings::defaults_for(ProviderId::Payments);
        settings.retry.max_attempts = 0;

        let error = registry
            .register(ProviderId::Payments, settings)
            .unwrap_err();
        assert!(error.to_string().contains("payments"));
        assert!(!registry.is_registered(ProviderId::Payments));
    }

    #[test]
    fn test_registration_and_lookup() {
        let registry = ProviderRegistry::new();
        assert!(registry.require(ProviderId::Email).is_err());

        registry
            .register(
                ProviderId::Email,
                ProviderSettings::defaults_for(ProviderId::Email),
            )
            .unwrap();
        assert!(registry.is_registered(ProviderId::Email));
        assert!(registry.require(ProviderId::Email).is_ok());
        assert_eq!(registry.registered(), vec![ProviderId::Email]);

        registry
            .register(
                ProviderId::Payments,
                ProviderSettings::defaults_for(ProviderId::Payments),
            )
            .unwrap();
        assert_eq!(
            registry.registered(),
            vec![ProviderId::Payments, ProviderId::Email]
        );
    }
}
