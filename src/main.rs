//! Main binary entry point for the Reliability Service
//!
//! Provides the HTTP surface for webhook ingestion, health reporting and
//! metrics on top of the reliability layer: retries with backoff, circuit
//! breakers, rate limiting and bulk execution for outbound provider calls.

use reliability_service::{ReliabilityServer, ServiceConfig};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Environment files are optional; real environments set variables directly.
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    info!(
        "Starting Reliability Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match ServiceConfig::from_env() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    log_startup_summary(&config);

    let server = match ReliabilityServer::new(config).await {
        Ok(server) => {
            info!("Reliability service initialized successfully");
            server
        }
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Service error: {}", e);
        process::exit(1);
    }

    info!("Reliability Service shutdown complete");
}

/// Initialize tracing/logging
///
/// Reads the same environment variables the configuration layer does, since
/// logging has to be up before the configuration loader can report errors.
fn init_tracing() -> anyhow::Result<()> {
    let log_level =
        std::env::var("RELIABILITY__LOGGING__LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_format =
        std::env::var("RELIABILITY__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_new(&log_level).or_else(|_| EnvFilter::try_new("info"))?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    Ok(())
}

/// Log what the service will run with before it starts accepting traffic
fn log_startup_summary(config: &ServiceConfig) {
    match &config.redis.url {
        Some(url) => info!("State store: Redis at {}", url),
        None => warn!("State store: in-memory (single instance only, no persistence)"),
    }

    let mut secured = Vec::new();
    let mut unsecured = Vec::new();
    for provider in reliability_service::ProviderId::ALL {
        if config.webhooks.secret_for(provider).is_some() {
            secured.push(provider.as_str());
        } else {
            unsecured.push(provider.as_str());
        }
    }
    if !secured.is_empty() {
        info!("Webhook signing secrets configured: {}", secured.join(", "));
    }
    if !unsecured.is_empty() {
        warn!(
            "No webhook signing secret for: {} (inbound deliveries will be rejected)",
            unsecured.join(", ")
        );
    }

    info!(
        "Inbound webhook rate limit: {} deliveries/min per source",
        config.webhooks.inbound_limit_per_minute
    );
    info!(
        "Health window: {}s, cleanup every {}s",
        config.health.window_secs, config.sweeper.interval_secs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_startup_summary_handles_defaults() {
        let config = ServiceConfig::default();
        log_startup_summary(&config);
    }
}
