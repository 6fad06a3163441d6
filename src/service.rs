//! Service facade and HTTP server
//!
//! [`ReliabilityService`] is the dependency context the rest of the crate
//! hangs off: provider registry, circuit breakers, rate limiter, health
//! aggregator, bulk executor, webhook validator and metrics, all built
//! around one key-value store. Handlers receive it through [`AppState`];
//! nothing in the crate is reachable through globals.
//!
//! [`ReliabilityServer`] wraps the facade in an axum server with the
//! middleware stack, a scheduled cleanup task and graceful shutdown.

use crate::config::ServiceConfig;
use crate::error::{ReliabilityError, ReliabilityResult};
use crate::handlers;
use crate::health::HealthAggregator;
use crate::metrics::ServiceMetrics;
use crate::models::{
    ApiCallResult, AttemptError, BulkOperationResult, CallOutcome, HealthMetrics, HealthReport,
    HealthStatus, Priority, ProviderHealthSummary, ProviderId, ProviderResponse,
    WebhookValidationResult,
};
use crate::providers::{ProviderRegistry, ProviderSettings};
use crate::reliability::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats, CircuitState};
use crate::reliability::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::reliability::{execute_with_retry, BulkExecutor};
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use crate::webhook::WebhookValidator;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Central dependency context for the reliability layer.
pub struct ReliabilityService {
    registry: ProviderRegistry,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiter,
    health: HealthAggregator,
    bulk: BulkExecutor,
    validator: WebhookValidator,
    metrics: ServiceMetrics,
    store: Arc<dyn KeyValueStore>,
}

impl ReliabilityService {
    /// Build a service around an existing store.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        health_window: Duration,
        inbound_limit_per_minute: u32,
    ) -> Self {
        Self {
            registry: ProviderRegistry::new(),
            breakers: CircuitBreakerRegistry::new(),
            limiter: RateLimiter::new(),
            health: HealthAggregator::new(health_window),
            bulk: BulkExecutor::new(),
            validator: WebhookValidator::new(store.clone())
                .with_inbound_limit(inbound_limit_per_minute),
            metrics: ServiceMetrics::new(),
            store,
        }
    }

    /// Build the store named by the configuration and register every
    /// provider class with its defaults (plus any configured webhook
    /// secrets).
    pub async fn from_config(config: &ServiceConfig) -> ReliabilityResult<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.redis.url {
            Some(url) => {
                info!(url = %url, "Connecting to Redis store");
                Arc::new(RedisStore::connect(url).await?)
            }
            None => {
                info!("No Redis URL configured, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let service = Self::new(
            store,
            Duration::from_secs(config.health.window_secs),
            config.webhooks.inbound_limit_per_minute,
        );
        for provider in ProviderId::ALL {
            let settings = match config.webhooks.secret_for(provider) {
                Some(secret) => ProviderSettings::defaults_with_secret(provider, secret),
                None => ProviderSettings::defaults_for(provider),
            };
            service.register_provider(provider, settings)?;
        }
        Ok(service)
    }

    /// Register (or re-register) a provider across every subsystem. The only
    /// place configuration mistakes surface as errors.
    pub fn register_provider(
        &self,
        provider: ProviderId,
        settings: ProviderSettings,
    ) -> ReliabilityResult<()> {
        let settings = self.registry.register(provider, settings)?;
        self.limiter.configure(provider, settings.rate_limit.clone());
        self.breakers.get_or_create(provider, &settings.circuit_breaker);
        self.health.set_thresholds(provider, settings.sla.clone());
        if let Some(signature) = settings.signature.clone() {
            self.validator
                .register_signature(provider, signature)
                .map_err(|message| {
                    ReliabilityError::invalid_policy(provider.as_str(), message)
                })?;
        }
        Ok(())
    }

    /// Run one operation through the full pipeline: rate limiter gate,
    /// circuit breaker, retries with backoff, health recording. Expected
    /// failure modes come back as [`CallOutcome`] variants, not errors.
    pub async fn execute<F, Fut>(
        &self,
        provider: ProviderId,
        operation: &str,
        priority: Priority,
        call: F,
    ) -> ReliabilityResult<CallOutcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, AttemptError>>,
    {
        let settings = self.registry.require(provider)?;
        let breaker = self.breakers.get_or_create(provider, &settings.circuit_breaker);

        let admission = self.limiter.try_acquire(provider, priority);
        if !admission.allowed {
            debug!(provider = %provider, operation, window = %admission.window, "Call rejected by rate limiter");
            let outcome = CallOutcome::RateLimited {
                provider,
                info: admission,
            };
            self.metrics.record_call(&outcome);
            return Ok(outcome);
        }

        let outcome = execute_with_retry(
            provider,
            operation,
            &settings.retry,
            &breaker,
            &self.health,
            call,
        )
        .await;
        self.metrics.record_call(&outcome);
        Ok(outcome)
    }

    /// Like [`execute`](Self::execute), flattened into the caller-facing
    /// result shape.
    pub async fn execute_with_reliability<F, Fut>(
        &self,
        provider: ProviderId,
        operation: &str,
        priority: Priority,
        call: F,
    ) -> ReliabilityResult<ApiCallResult>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, AttemptError>>,
    {
        Ok(self
            .execute(provider, operation, priority, call)
            .await?
            .into_result())
    }

    /// Run `call` for every item, batched; each item passes through the full
    /// pipeline individually.
    pub async fn execute_bulk<T, F, Fut>(
        &self,
        provider: ProviderId,
        operation: &str,
        priority: Priority,
        items: Vec<T>,
        call: F,
    ) -> ReliabilityResult<BulkOperationResult>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<ProviderResponse, AttemptError>>,
    {
        let settings = self.registry.require(provider)?;
        let call = &call;
        let result = self
            .bulk
            .run(provider, operation, items, &settings.bulk, |item: T| async move {
                match self
                    .execute(provider, operation, priority, || call(item.clone()))
                    .await
                {
                    Ok(outcome) => outcome.into_result(),
                    Err(error) => ApiCallResult::failed(
                        provider,
                        error.to_string(),
                        None,
                        0,
                        0.0,
                        CircuitState::Closed.as_str().to_string(),
                    ),
                }
            })
            .await;
        self.metrics.record_bulk(&result);
        Ok(result)
    }

    /// Validate one inbound webhook delivery.
    pub async fn validate_webhook(
        &self,
        provider: ProviderId,
        source_ip: IpAddr,
        headers: &HashMap<String, String>,
        payload: &[u8],
    ) -> ReliabilityResult<WebhookValidationResult> {
        if !self.registry.is_registered(provider) {
            return Err(ReliabilityError::unknown_provider(provider.as_str()));
        }
        let result = self
            .validator
            .validate(provider, source_ip, headers, payload)
            .await;
        self.metrics.record_webhook(&result);
        Ok(result)
    }

    /// Health summary for one provider.
    pub fn provider_health(&self, provider: ProviderId) -> ReliabilityResult<ProviderHealthSummary> {
        self.registry.require(provider)?;
        Ok(self.build_summary(provider))
    }

    /// Aggregated report across every registered provider.
    pub fn health_report(&self) -> HealthReport {
        let providers = self.registry.registered();
        if providers.is_empty() {
            return HealthReport::empty();
        }

        let mut summaries = HashMap::new();
        let mut alerts = Vec::new();
        let mut recommendations = Vec::new();
        let mut overall = HealthStatus::Unknown;

        for provider in providers {
            let summary = self.build_summary(provider);

            if summary.circuit_state == CircuitState::Open.as_str() {
                alerts.push(format!("circuit breaker open for {}", provider));
                recommendations.push(format!(
                    "{}: wait for the cooldown probe or reset the breaker after fixing the upstream",
                    provider
                ));
            }
            match summary.status {
                HealthStatus::Unhealthy => {
                    alerts.push(format!("{} is unhealthy", provider));
                    recommendations
                        .push(format!("{}: investigate provider connectivity and error rates", provider));
                }
                HealthStatus::Degraded => {
                    alerts.push(format!("{} is degraded", provider));
                }
                HealthStatus::Healthy | HealthStatus::Unknown => {}
            }
            if summary.rate_limit_utilization > 0.8 {
                recommendations.push(format!(
                    "{}: outbound rate budget above 80%, consider spreading traffic",
                    provider
                ));
            }

            overall = worst_status(overall, summary.status);
            summaries.insert(provider.as_str().to_string(), summary);
        }

        HealthReport {
            generated_at: Utc::now(),
            overall_status: overall,
            providers: summaries,
            alerts,
            recommendations,
        }
    }

    fn build_summary(&self, provider: ProviderId) -> ProviderHealthSummary {
        let (status, metrics, sla_compliant) = match self.health.evaluate(provider) {
            Some(evaluated) => evaluated,
            None => (HealthStatus::Unknown, empty_metrics(provider), true),
        };
        let circuit_state = self
            .breakers
            .get(provider)
            .map(|breaker| breaker.current_state().as_str().to_string())
            .unwrap_or_else(|| CircuitState::Closed.as_str().to_string());
        ProviderHealthSummary {
            status,
            metrics,
            sla_compliant,
            circuit_state,
            rate_limit_utilization: self.limiter.utilization(provider),
        }
    }

    /// Reset a provider's circuit breaker to closed.
    pub fn reset_breaker(&self, provider: ProviderId) -> ReliabilityResult<()> {
        self.registry.require(provider)?;
        if let Some(breaker) = self.breakers.get(provider) {
            breaker.reset();
            info!(provider = %provider, "Circuit breaker reset");
        }
        Ok(())
    }

    /// Drop expired windows and samples across all subsystems.
    #[instrument(level = "debug", skip(self))]
    pub fn sweep(&self, idle: Duration) -> CleanupSummary {
        let summary = CleanupSummary {
            rate_limit_windows: self.limiter.sweep_stale(idle),
            health_samples: self.health.sweep(),
            threat_windows: self.validator.threat().sweep(idle),
        };
        debug!(
            rate_limit_windows = summary.rate_limit_windows,
            health_samples = summary.health_samples,
            threat_windows = summary.threat_windows,
            "Cleanup pass finished"
        );
        summary
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.all_stats()
    }

    pub fn limiter_stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }

    pub fn registered_providers(&self) -> Vec<ProviderId> {
        self.registry.registered()
    }

    /// Store health, used by the readiness endpoint.
    pub async fn store_ready(&self) -> bool {
        self.store.get("health:probe").await.is_ok()
    }
}

fn empty_metrics(provider: ProviderId) -> HealthMetrics {
    HealthMetrics {
        provider,
        success_count: 0,
        failure_count: 0,
        avg_response_time_ms: 0.0,
        error_rate_percent: 0.0,
        success_rate_percent: 0.0,
        availability_percent: 100.0,
        last_success: None,
        last_failure: None,
        window_samples: 0,
    }
}

fn worst_status(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    fn severity(status: HealthStatus) -> u8 {
        match status {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }
    if severity(b) > severity(a) {
        b
    } else {
        a
    }
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub rate_limit_windows: usize,
    pub health_samples: usize,
    pub threat_windows: usize,
}

/// Handle to the scheduled cleanup task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "Cleanup task did not stop cleanly");
        }
    }
}

/// Start the scheduled cleanup task.
pub fn spawn_sweeper(
    service: Arc<ReliabilityService>,
    interval: Duration,
    idle: Duration,
) -> SweeperHandle {
    let (shutdown, mut signal) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        info!(interval_secs = interval.as_secs(), "Cleanup task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    service.sweep(idle);
                }
                changed = signal.changed() => {
                    if changed.is_err() || *signal.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Cleanup task stopped");
    });
    SweeperHandle { shutdown, task }
}

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: ServiceConfig,
    pub service: Arc<ReliabilityService>,
}

#[derive(Clone, Default)]
struct RequestIdGenerator;

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = format!("req-{}", Uuid::new_v4());
        axum::http::HeaderValue::from_str(&id)
            .ok()
            .map(RequestId::new)
    }
}

/// HTTP server around the reliability facade.
pub struct ReliabilityServer {
    state: Arc<AppState>,
}

impl ReliabilityServer {
    pub async fn new(config: ServiceConfig) -> ReliabilityResult<Self> {
        let service = Arc::new(ReliabilityService::from_config(&config).await?);
        let state = Arc::new(AppState { config, service });
        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Serve until SIGINT/SIGTERM, then stop the cleanup task.
    pub async fn run(self) -> ReliabilityResult<()> {
        let sweeper = spawn_sweeper(
            self.state.service.clone(),
            Duration::from_secs(self.state.config.sweeper.interval_secs),
            Duration::from_secs(self.state.config.sweeper.idle_secs),
        );

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.state.config.server.request_timeout_secs,
            )))
            .layer(CompressionLayer::new())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(SetRequestIdLayer::new(
                axum::http::header::HeaderName::from_static("x-request-id"),
                RequestIdGenerator::default(),
            ));

        let addr = self.state.config.bind_addr()?;
        let app = handlers::create_routes(self.state.clone()).layer(middleware);
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            ReliabilityError::internal(format!("failed to bind {}: {}", addr, e))
        })?;
        info!(%addr, "Reliability service listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ReliabilityError::internal(format!("server error: {}", e)))?;

        info!("Server stopped, shutting down background tasks");
        sweeper.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => warn!(error = %error, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::rate_limiter::RateLimitConfig;
    use crate::reliability::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service() -> ReliabilityService {
        ReliabilityService::new(Arc::new(MemoryStore::new()), Duration::from_secs(300), 120)
    }

    fn fast_settings(provider: ProviderId) -> ProviderSettings {
        let mut settings = ProviderSettings::defaults_for(provider);
        settings.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: 0.01,
            max_delay: 0.05,
            jitter: false,
            ..RetryPolicy::default()
        };
        settings.rate_limit = RateLimitConfig {
            requests_per_second: 1000,
            requests_per_minute: 10_000,
            burst_allowance: 100,
            ..RateLimitConfig::default()
        };
        settings.bulk.delay_between_batches = 0.0;
        settings.bulk.min_batch_size = 1;
        settings
    }

    #[tokio::test]
    async fn test_execute_requires_registration() {
        let service = service();
        let error = service
            .execute(ProviderId::Payments, "charge", Priority::Normal, || async {
                Ok(ProviderResponse::ok())
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ReliabilityError::UnknownProvider { .. }));
    }

    #[tokio::test]
    async fn test_execute_records_metrics_and_health() {
        let service = service();
        service
            .register_provider(ProviderId::Payments, fast_settings(ProviderId::Payments))
            .unwrap();

        let outcome = service
            .execute(ProviderId::Payments, "charge", Priority::Normal, || async {
                Ok(ProviderResponse::ok())
            })
            .await
            .unwrap();
        assert!(outcome.is_ok());

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.calls_total, 1);
        assert_eq!(snapshot.calls_succeeded, 1);

        let summary = service.provider_health(ProviderId::Payments).unwrap();
        assert_eq!(summary.metrics.success_count, 1);
        assert_eq!(summary.circuit_state, "closed");
    }

    #[tokio::test]
    async fn test_rate_limited_call_skips_the_operation() {
        let service = service();
        let mut settings = fast_settings(ProviderId::Sms);
        settings.rate_limit = RateLimitConfig {
            requests_per_second: 1,
            requests_per_minute: 100,
            burst_allowance: 0,
            priority_multipliers: HashMap::new(),
        };
        service.register_provider(ProviderId::Sms, settings).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let run = |calls: Arc<AtomicU32>| {
            service.execute(ProviderId::Sms, "send_sms", Priority::Normal, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ProviderResponse::ok())
                }
            })
        };

        let first = run(calls.clone()).await.unwrap();
        assert!(first.is_ok());

        let second = run(calls.clone()).await.unwrap();
        assert!(matches!(second, CallOutcome::RateLimited { .. }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.metrics().snapshot().calls_rejected_rate_limit, 1);
    }

    #[tokio::test]
    async fn test_bulk_runs_each_item_through_the_pipeline() {
        let service = service();
        service
            .register_provider(ProviderId::Generic, fast_settings(ProviderId::Generic))
            .unwrap();

        let items: Vec<u32> = (1..=10).collect();
        let result = service
            .execute_bulk(
                ProviderId::Generic,
                "sync_items",
                Priority::Normal,
                items,
                |id| async move {
                    if id % 3 == 0 {
                        Err(AttemptError::client(400, format!("item {} rejected", id)))
                    } else {
                        Ok(ProviderResponse::with_data(serde_json::json!({ "id": id })))
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result.total_items, 10);
        assert_eq!(result.successful_items, 7);
        assert_eq!(result.failed_items, 3);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.results.len(), 10);
        assert!(!result.results[2].success);
        assert!(result.results[0].success);
        assert_eq!(service.metrics().snapshot().bulk_runs_total, 1);
    }

    #[tokio::test]
    async fn test_health_report_includes_alerts_for_open_breakers() {
        let service = service();
        service
            .register_provider(ProviderId::Payments, fast_settings(ProviderId::Payments))
            .unwrap();
        service
            .register_provider(ProviderId::Email, fast_settings(ProviderId::Email))
            .unwrap();

        let report = service.health_report();
        assert_eq!(report.overall_status, HealthStatus::Unknown);
        assert_eq!(report.providers.len(), 2);
        assert!(report.alerts.is_empty());

        if let Some(breaker) = service.breakers.get(ProviderId::Payments) {
            breaker.force_open();
        }
        let report = service.health_report();
        assert!(report
            .alerts
            .iter()
            .any(|a| a.contains("circuit breaker open for payments")));
        assert_eq!(
            report.providers["payments"].circuit_state,
            CircuitState::Open.as_str()
        );

        service.reset_breaker(ProviderId::Payments).unwrap();
        let report = service.health_report();
        assert!(report.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_validation_requires_registration() {
        let service = service();
        let error = service
            .validate_webhook(
                ProviderId::Payments,
                "3.18.12.63".parse().unwrap(),
                &HashMap::new(),
                b"{}",
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ReliabilityError::UnknownProvider { .. }));
    }

    #[tokio::test]
    async fn test_sweeper_starts_and_stops_cleanly() {
        let service = Arc::new(service());
        let handle = spawn_sweeper(
            service.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_reports_removed_state() {
        let service = service();
        service
            .register_provider(ProviderId::Sms, fast_settings(ProviderId::Sms))
            .unwrap();
        service
            .execute(ProviderId::Sms, "send_sms", Priority::Normal, || async {
                Ok(ProviderResponse::ok())
            })
            .await
            .unwrap();

        let summary = service.sweep(Duration::ZERO);
        assert_eq!(summary.rate_limit_windows, 1);
    }
}
