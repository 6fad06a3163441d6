//! HTTP request handlers
//!
//! Routes: webhook ingestion under `/webhooks/:provider`, health and
//! readiness probes, the aggregated health report, per-provider summaries,
//! circuit breaker administration and Prometheus metrics.

use crate::models::{
    HealthCheckResponse, HealthStatus, ProviderId, WebhookResponse,
};
use crate::service::AppState;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Create the application router with all routes
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/report", get(health_report))
        .route("/health/:provider", get(provider_health))
        // Metrics endpoint
        .route("/metrics", get(metrics_handler))
        // Circuit breaker administration
        .route("/breakers", get(list_breakers))
        .route("/breakers/:provider/reset", post(reset_breaker))
        // Webhook ingestion
        .route("/webhooks/:provider", post(webhook_handler))
        .with_state(state)
}

/// Service-level health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");

    let report = state.service.health_report();
    let providers = report
        .providers
        .iter()
        .map(|(name, summary)| (name.clone(), summary.status))
        .collect();

    let response = HealthCheckResponse {
        service: "reliability-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: report.overall_status,
        providers,
        uptime_seconds: state.service.metrics().uptime_seconds(),
        timestamp: Utc::now(),
    };

    let status_code = match response.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        // Degraded still accepts traffic
        _ => StatusCode::OK,
    };

    (status_code, Json(response))
}

/// Liveness check endpoint (for Kubernetes)
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}

/// Readiness check endpoint (for Kubernetes)
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.service.store_ready().await {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready"})),
        )
    }
}

/// Full health report across all registered providers
async fn health_report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.health_report()))
}

/// Health summary for a single provider
async fn provider_health(
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let provider_id = match ProviderId::parse(&provider) {
        Ok(id) => id,
        Err(message) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response();
        }
    };
    match state.service.provider_health(provider_id) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// Metrics endpoint (Prometheus format)
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics_text = state.service.metrics().to_prometheus_format();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics_text,
    )
}

/// Circuit breaker and rate limiter statistics
async fn list_breakers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "circuit_breakers": state.service.breaker_stats(),
            "rate_limiter": state.service.limiter_stats(),
        })),
    )
}

/// Force a provider's circuit breaker back to closed
async fn reset_breaker(
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let provider_id = match ProviderId::parse(&provider) {
        Ok(id) => id,
        Err(message) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response();
        }
    };
    match state.service.reset_breaker(provider_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "reset", "provider": provider_id})),
        )
            .into_response(),
        Err(error) => error.into_response(),
    }
}

/// Webhook ingestion endpoint
async fn webhook_handler(
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();
    let start_time = std::time::Instant::now();

    debug!(
        request_id = %request_id,
        provider = %provider,
        source_ip = %addr.ip(),
        payload_bytes = body.len(),
        "Processing webhook delivery"
    );

    let provider_id = match ProviderId::parse(&provider) {
        Ok(id) => id,
        Err(message) => {
            warn!(request_id = %request_id, provider = %provider, "Webhook for unknown provider");
            return (
                StatusCode::NOT_FOUND,
                Json(WebhookResponse::error(request_id, message)),
            )
                .into_response();
        }
    };

    // Header names are matched case-insensitively downstream.
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let result = match state
        .service
        .validate_webhook(provider_id, addr.ip(), &header_map, &body)
        .await
    {
        Ok(result) => result,
        Err(error) => {
            warn!(
                request_id = %request_id,
                provider = %provider_id,
                error = %error,
                "Webhook validation errored"
            );
            return error.into_response();
        }
    };

    let processing_time = start_time.elapsed();
    if result.is_valid {
        info!(
            request_id = %request_id,
            provider = %provider_id,
            event_id = result.event_id.as_deref().unwrap_or("unknown"),
            security_score = result.security_score,
            processing_time_ms = processing_time.as_millis() as u64,
            "Webhook accepted"
        );
        (
            StatusCode::OK,
            Json(WebhookResponse::accepted(request_id, &result)),
        )
            .into_response()
    } else {
        warn!(
            request_id = %request_id,
            provider = %provider_id,
            reason = result.error_message.as_deref().unwrap_or("unspecified"),
            processing_time_ms = processing_time.as_millis() as u64,
            "Webhook rejected"
        );
        (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::rejected(request_id, &result)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::service::ReliabilityService;
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn test_state() -> Arc<AppState> {
        let service = Arc::new(ReliabilityService::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(300),
            120,
        ));
        let config = ServiceConfig::default();
        Arc::new(AppState { config, service })
    }

    #[tokio::test]
    async fn test_router_builds_with_state() {
        let state = test_state().await;
        let _router = create_routes(state);
    }

    #[tokio::test]
    async fn test_health_check_reports_service_identity() {
        let state = test_state().await;
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_provider_health_rejects_unknown_names() {
        let state = test_state().await;
        let response = provider_health(Path("fax".to_string()), State(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_prometheus_text() {
        let state = test_state().await;
        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.starts_with("text/plain"));
    }
}
