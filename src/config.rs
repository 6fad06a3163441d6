//! Service configuration
//!
//! Defaults cover local development; every field can be overridden through
//! `RELIABILITY__`-prefixed environment variables (double underscore as the
//! section separator, e.g. `RELIABILITY__SERVER__PORT=9090`).

use crate::error::{ReliabilityError, ReliabilityResult};
use crate::models::ProviderId;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
    pub sweeper: SweeperConfig,
    pub webhooks: WebhookSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Budget for one inbound HTTP request, in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL. When unset, state is kept in process memory; fine for
    /// a single instance, required-for-correctness across replicas.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// One of `json`, `pretty`, `compact`.
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Rolling metrics window, in seconds.
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// How often the background cleanup task runs, in seconds.
    pub interval_secs: u64,
    /// Tracked state idle longer than this is dropped, in seconds.
    pub idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Inbound deliveries allowed per source per minute.
    pub inbound_limit_per_minute: u32,
    pub payments_secret: Option<String>,
    pub sms_secret: Option<String>,
    pub email_secret: Option<String>,
    pub calendar_secret: Option<String>,
    pub generic_secret: Option<String>,
}

impl WebhookSettings {
    /// Signing secret configured for a provider, if any.
    pub fn secret_for(&self, provider: ProviderId) -> Option<&str> {
        let secret = match provider {
            ProviderId::Payments => &self.payments_secret,
            ProviderId::Sms => &self.sms_secret,
            ProviderId::Email => &self.email_secret,
            ProviderId::Calendar => &self.calendar_secret,
            ProviderId::Generic => &self.generic_secret,
        };
        secret.as_deref()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
            sweeper: SweeperConfig::default(),
            webhooks: WebhookSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            request_timeout_secs: 30,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: None }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { window_secs: 300 }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            idle_secs: 3600,
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            inbound_limit_per_minute: 120,
            payments_secret: None,
            sms_secret: None,
            email_secret: None,
            calendar_secret: None,
            generic_secret: None,
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from defaults overlaid with environment
    /// variables.
    pub fn from_env() -> ReliabilityResult<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8085)?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("redis.url", None::<String>)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("health.window_secs", 300)?
            .set_default("sweeper.interval_secs", 60)?
            .set_default("sweeper.idle_secs", 3600)?
            .set_default("webhooks.inbound_limit_per_minute", 120)?
            .set_default("webhooks.payments_secret", None::<String>)?
            .set_default("webhooks.sms_secret", None::<String>)?
            .set_default("webhooks.email_secret", None::<String>)?
            .set_default("webhooks.calendar_secret", None::<String>)?
            .set_default("webhooks.generic_secret", None::<String>)?
            .add_source(
                Environment::with_prefix("RELIABILITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServiceConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for mistakes before the service starts.
    pub fn validate(&self) -> ReliabilityResult<()> {
        if self.server.port == 0 {
            return Err(ReliabilityError::configuration("server.port must not be 0"));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ReliabilityError::configuration(
                "server.request_timeout_secs must be positive",
            ));
        }
        if !["json", "pretty", "compact"].contains(&self.logging.format.as_str()) {
            return Err(ReliabilityError::configuration(format!(
                "logging.format must be json, pretty or compact, got {}",
                self.logging.format
            )));
        }
        if self.health.window_secs == 0 {
            return Err(ReliabilityError::configuration(
                "health.window_secs must be positive",
            ));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ReliabilityError::configuration(
                "sweeper.interval_secs must be positive",
            ));
        }
        if self.webhooks.inbound_limit_per_minute == 0 {
            return Err(ReliabilityError::configuration(
                "webhooks.inbound_limit_per_minute must be positive",
            ));
        }
        if let Some(url) = &self.redis.url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ReliabilityError::configuration(
                    "redis.url must start with redis:// or rediss://",
                ));
            }
        }
        Ok(())
    }

    /// Socket address the server binds to.
    pub fn bind_addr(&self) -> ReliabilityResult<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                ReliabilityError::configuration(format!("invalid server address: {}", e))
            })
    }
}

impl From<config::ConfigError> for ReliabilityError {
    fn from(error: config::ConfigError) -> Self {
        ReliabilityError::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // from_env() reads the process environment, so tests touching it must
    // not run concurrently.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_defaults_load_and_validate() {
        let _guard = ENV_LOCK.lock();
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.server.port, 8085);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.health.window_secs, 300);
        assert_eq!(config.webhooks.inbound_limit_per_minute, 120);
        assert!(config.redis.url.is_none());
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.redis.url = Some("http://localhost:6379".to_string());
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.redis.url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_lookup_per_provider() {
        let mut config = ServiceConfig::default();
        config.webhooks.payments_secret = Some("whsec_abc".to_string());
        assert_eq!(
            config.webhooks.secret_for(ProviderId::Payments),
            Some("whsec_abc")
        );
        assert_eq!(config.webhooks.secret_for(ProviderId::Sms), None);
    }

    #[test]
    fn test_environment_override() {
        let _guard = ENV_LOCK.lock();
        std::env::set_var("RELIABILITY__SERVER__PORT", "9191");
        let config = ServiceConfig::from_env().unwrap();
        std::env::remove_var("RELIABILITY__SERVER__PORT");
        assert_eq!(config.server.port, 9191);
    }
}
