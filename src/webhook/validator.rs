//! Inbound webhook validation pipeline
//!
//! Seven checks run in order for every delivery: source IP allow-list,
//! inbound per-source rate limit, signature verification, replay detection,
//! payload heuristics, threat patterns, and source reputation. Allow-list,
//! signature and blocked-reputation failures reject the delivery outright;
//! every other finding is a soft signal that lowers the security score but
//! leaves the delivery valid.
//!
//! The security score starts at 1.0 and is multiplied by a factor in (0, 1]
//! for each soft finding, then clamped to [0, 1]. Hard failures floor it to
//! zero.

use crate::models::{IpReputation, ProviderId, RateLimitInfo, WebhookValidationResult};
use crate::store::{unix_millis, KeyValueStore};
use crate::webhook::threat::{ThreatTracker, SIGNATURE_FAILURE_THRESHOLD};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use ipnet::IpNet;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::bytes::{Regex, RegexSet};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Payloads above this size are flagged as oversized.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;
/// Replay markers are kept this long; a duplicate inside the window is
/// flagged.
pub const REPLAY_TTL: Duration = Duration::from_secs(900);
/// Default inbound deliveries allowed per source per minute.
pub const DEFAULT_INBOUND_LIMIT_PER_MINUTE: u32 = 120;

const SCORE_RATE_LIMITED: f64 = 0.5;
const SCORE_DUPLICATE: f64 = 0.5;
const SCORE_OVERSIZED: f64 = 0.8;
const SCORE_SCRIPT_MARKERS: f64 = 0.3;
const SCORE_CONTENT_PATTERN: f64 = 0.6;
const SCORE_RAPID_FIRE: f64 = 0.6;
const SCORE_REPEATED_SIG_FAILURES: f64 = 0.4;
const SCORE_SUSPICIOUS_REPUTATION: f64 = 0.7;

static SCRIPT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<script|javascript:|onerror\s*=|onload\s*=)").expect("valid pattern")
});

static THREAT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)union\s+select",
        r"(?i)drop\s+table",
        r"\.\./\.\./",
        r"(?i)\beval\s*\(",
        r"(?i)<iframe",
    ])
    .expect("valid patterns")
});

fn parse_networks(cidrs: &[&str]) -> Vec<IpNet> {
    cidrs
        .iter()
        .map(|c| c.parse().expect("valid CIDR literal"))
        .collect()
}

// Published webhook egress ranges for each provider class. Payment entries
// follow Stripe's webhook IP list; messaging and email entries follow the
// Twilio and SendGrid ranges.
static PAYMENT_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    parse_networks(&[
        "3.18.12.63/32",
        "3.130.192.231/32",
        "13.235.14.237/32",
        "13.235.122.149/32",
        "18.211.135.69/32",
        "35.154.171.200/32",
        "52.15.183.38/32",
        "54.88.130.119/32",
        "54.88.130.237/32",
        "54.187.174.169/32",
        "54.187.205.235/32",
        "54.187.216.72/32",
    ])
});

static SMS_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    parse_networks(&[
        "54.172.60.0/23",
        "54.244.51.0/24",
        "54.171.127.192/26",
        "35.156.191.128/25",
    ])
});

static EMAIL_NETWORKS: Lazy<Vec<IpNet>> =
    Lazy::new(|| parse_networks(&["167.89.0.0/17", "168.245.0.0/17", "149.72.0.0/16"]));

static CALENDAR_NETWORKS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    parse_networks(&[
        "64.233.160.0/19",
        "66.102.0.0/20",
        "66.249.80.0/20",
        "72.14.192.0/18",
        "74.125.0.0/16",
        "108.177.8.0/21",
        "209.85.128.0/17",
        "216.58.192.0/19",
        "216.239.32.0/19",
    ])
});

/// Allowed source networks for a provider. An empty list means any public
/// address is acceptable.
pub fn allowed_networks(provider: ProviderId) -> &'static [IpNet] {
    match provider {
        ProviderId::Payments => &PAYMENT_NETWORKS,
        ProviderId::Sms => &SMS_NETWORKS,
        ProviderId::Email => &EMAIL_NETWORKS,
        ProviderId::Calendar => &CALENDAR_NETWORKS,
        ProviderId::Generic => &[],
    }
}

/// Private, loopback, link-local and other non-routable sources are never
/// acceptable, even for providers without a pinned network list.
pub fn is_public_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                || v4.is_unspecified())
        }
        IpAddr::V6(v6) => {
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

fn source_allowed(provider: ProviderId, ip: IpAddr) -> bool {
    if !is_public_address(ip) {
        return false;
    }
    let networks = allowed_networks(provider);
    networks.is_empty() || networks.iter().any(|net| net.contains(&ip))
}

/// How a provider signs its deliveries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignatureScheme {
    /// Header of the form `t=<unix>,v1=<hex>` where the digest covers
    /// `"{t}.{payload}"`. Deliveries older than the tolerance are refused.
    TimestampedHmacSha256 { tolerance_secs: u64 },
    /// Hex digest of the payload, with an optional `sha256=` prefix.
    HmacSha256Hex,
    /// Base64 digest of the payload.
    HmacSha256Base64,
}

/// Signature settings for one provider.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignatureConfig {
    /// Header carrying the signature, lowercase.
    pub header: String,
    pub scheme: SignatureScheme,
    /// Shared signing secret.
    pub secret: String,
}

impl SignatureConfig {
    /// The scheme and header each provider class conventionally uses.
    pub fn default_for(provider: ProviderId, secret: impl Into<String>) -> Self {
        let (header, scheme) = match provider {
            ProviderId::Payments => (
                "stripe-signature",
                SignatureScheme::TimestampedHmacSha256 { tolerance_secs: 300 },
            ),
            ProviderId::Sms => ("x-twilio-signature", SignatureScheme::HmacSha256Base64),
            ProviderId::Email | ProviderId::Calendar | ProviderId::Generic => {
                ("x-webhook-signature-256", SignatureScheme::HmacSha256Hex)
            }
        };
        Self {
            header: header.to_string(),
            scheme,
            secret: secret.into(),
        }
    }

    /// Check the configuration for mistakes at registration time.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("signing secret must not be empty".to_string());
        }
        if self.header.is_empty() {
            return Err("signature header must not be empty".to_string());
        }
        if let SignatureScheme::TimestampedHmacSha256 { tolerance_secs } = self.scheme {
            if tolerance_secs == 0 {
                return Err("timestamp tolerance must be positive".to_string());
            }
        }
        Ok(())
    }
}

fn hmac_digest(secret: &str, parts: &[&[u8]]) -> Result<Vec<u8>, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid signing secret".to_string())?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn digests_match(expected: &[u8], provided: &[u8]) -> bool {
    expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}

/// Verify a signature header against a payload. Comparison of digest bytes
/// is constant-time.
pub(crate) fn verify_signature(
    config: &SignatureConfig,
    header_value: &str,
    payload: &[u8],
    now_unix: i64,
) -> Result<(), String> {
    match config.scheme {
        SignatureScheme::TimestampedHmacSha256 { tolerance_secs } => {
            let mut timestamp: Option<i64> = None;
            let mut provided: Vec<Vec<u8>> = Vec::new();
            for pair in header_value.split(',') {
                match pair.trim().split_once('=') {
                    Some(("t", value)) => timestamp = value.parse().ok(),
                    Some(("v1", value)) => {
                        if let Ok(bytes) = hex::decode(value) {
                            provided.push(bytes);
                        }
                    }
                    _ => {}
                }
            }
            let Some(timestamp) = timestamp else {
                return Err("malformed signature header".to_string());
            };
            if provided.is_empty() {
                return Err("malformed signature header".to_string());
            }
            if now_unix.abs_diff(timestamp) > tolerance_secs {
                return Err("signature timestamp outside tolerance".to_string());
            }
            let expected = hmac_digest(
                &config.secret,
                &[timestamp.to_string().as_bytes(), b".", payload],
            )?;
            if provided.iter().any(|candidate| digests_match(&expected, candidate)) {
                Ok(())
            } else {
                Err("signature verification failed".to_string())
            }
        }
        SignatureScheme::HmacSha256Hex => {
            let value = header_value.strip_prefix("sha256=").unwrap_or(header_value);
            let provided =
                hex::decode(value).map_err(|_| "malformed signature header".to_string())?;
            let expected = hmac_digest(&config.secret, &[payload])?;
            if digests_match(&expected, &provided) {
                Ok(())
            } else {
                Err("signature verification failed".to_string())
            }
        }
        SignatureScheme::HmacSha256Base64 => {
            let provided = BASE64
                .decode(header_value)
                .map_err(|_| "malformed signature header".to_string())?;
            let expected = hmac_digest(&config.secret, &[payload])?;
            if digests_match(&expected, &provided) {
                Ok(())
            } else {
                Err("signature verification failed".to_string())
            }
        }
    }
}

/// Pull an event identifier and type out of a JSON payload, trying the key
/// names the supported provider classes use.
fn extract_event(payload: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_slice::<Value>(payload) else {
        return (None, None);
    };
    let event_id = ["id", "event_id", "message_id", "MessageSid", "sg_message_id"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str).map(String::from));
    let event_type = ["type", "event", "event_type", "MessageStatus"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str).map(String::from));
    (event_id, event_type)
}

fn content_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Case-insensitive header lookup. Callers store keys lowercase.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(&name.to_lowercase()).map(String::as_str)
}

/// Validates inbound webhook deliveries.
pub struct WebhookValidator {
    store: Arc<dyn KeyValueStore>,
    threat: ThreatTracker,
    signatures: RwLock<HashMap<ProviderId, SignatureConfig>>,
    inbound_limit_per_minute: u32,
}

impl WebhookValidator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            threat: ThreatTracker::new(),
            signatures: RwLock::new(HashMap::new()),
            inbound_limit_per_minute: DEFAULT_INBOUND_LIMIT_PER_MINUTE,
        }
    }

    pub fn with_inbound_limit(mut self, per_minute: u32) -> Self {
        self.inbound_limit_per_minute = per_minute.max(1);
        self
    }

    /// Install signature settings for a provider.
    pub fn register_signature(
        &self,
        provider: ProviderId,
        config: SignatureConfig,
    ) -> Result<(), String> {
        config.validate()?;
        self.signatures.write().insert(provider, config);
        Ok(())
    }

    pub fn has_signature_config(&self, provider: ProviderId) -> bool {
        self.signatures.read().contains_key(&provider)
    }

    /// Behavior tracker backing the reputation and rapid-fire checks.
    pub fn threat(&self) -> &ThreatTracker {
        &self.threat
    }

    /// Run the full validation pipeline for one delivery.
    #[instrument(level = "debug", skip_all, fields(provider = %provider, source = %source_ip, bytes = payload.len()))]
    pub async fn validate(
        &self,
        provider: ProviderId,
        source_ip: IpAddr,
        headers: &HashMap<String, String>,
        payload: &[u8],
    ) -> WebhookValidationResult {
        let request_count = self.threat.note_request(provider, source_ip);
        let mut indicators: Vec<String> = Vec::new();
        let mut score = 1.0f64;

        // 1. Source address allow-list.
        if !source_allowed(provider, source_ip) {
            self.threat.record_outcome(source_ip, false);
            warn!("Webhook rejected, source not allowed");
            return WebhookValidationResult::rejected(
                format!("source IP {} is not allowed for {}", source_ip, provider),
                self.threat.reputation(source_ip),
            );
        }

        // 2. Inbound per-source rate limit. Exceeding it is a soft signal.
        let rate_limit_info = match self.inbound_window_count(provider, source_ip).await {
            Ok(count) => {
                let limit = self.inbound_limit_per_minute;
                let exceeded = count > u64::from(limit);
                if exceeded {
                    indicators.push("rate_limit_exceeded".to_string());
                    score *= SCORE_RATE_LIMITED;
                }
                Some(RateLimitInfo {
                    allowed: !exceeded,
                    limit,
                    remaining: limit.saturating_sub(count.min(u64::from(u32::MAX)) as u32),
                    retry_after: if exceeded { 60.0 } else { 0.0 },
                    window: "minute".to_string(),
                })
            }
            Err(error) => {
                // A store outage must not drop provider traffic.
                warn!(error = %error, "Inbound rate-limit check unavailable, allowing");
                None
            }
        };

        // 3. Signature verification.
        let signature_config = self.signatures.read().get(&provider).cloned();
        let Some(signature_config) = signature_config else {
            warn!("Webhook rejected, no signature configuration registered");
            return WebhookValidationResult::rejected(
                format!("no signature configuration registered for {}", provider),
                self.threat.reputation(source_ip),
            );
        };
        let Some(signature) = header_value(headers, &signature_config.header) else {
            self.threat.note_signature_failure(source_ip);
            self.threat.record_outcome(source_ip, false);
            return WebhookValidationResult::rejected(
                format!("missing signature header {}", signature_config.header),
                self.threat.reputation(source_ip),
            );
        };
        if let Err(reason) =
            verify_signature(&signature_config, signature, payload, Utc::now().timestamp())
        {
            self.threat.note_signature_failure(source_ip);
            self.threat.record_outcome(source_ip, false);
            warn!(reason = %reason, "Webhook rejected, signature check failed");
            return WebhookValidationResult::rejected(reason, self.threat.reputation(source_ip));
        }

        // 4. Replay detection by content hash.
        let replay_key = format!(
            "webhook:replay:{}:{}",
            provider,
            content_hash(payload)
        );
        match self.store.set_nx(&replay_key, "1", REPLAY_TTL).await {
            Ok(first_delivery) => {
                if !first_delivery {
                    indicators.push("duplicate_delivery".to_string());
                    score *= SCORE_DUPLICATE;
                }
            }
            Err(error) => {
                warn!(error = %error, "Replay check unavailable, allowing");
            }
        }

        // 5. Payload heuristics.
        if payload.len() > MAX_PAYLOAD_BYTES {
            indicators.push("oversized_payload".to_string());
            score *= SCORE_OVERSIZED;
        }
        if SCRIPT_MARKERS.is_match(payload) {
            indicators.push("script_injection_markers".to_string());
            score *= SCORE_SCRIPT_MARKERS;
        }

        // 6. Threat patterns and source behavior.
        if THREAT_PATTERNS.is_match(payload) {
            indicators.push("suspicious_content_pattern".to_string());
            score *= SCORE_CONTENT_PATTERN;
        }
        if ThreatTracker::is_rapid_fire(request_count) {
            indicators.push("rapid_fire_source".to_string());
            score *= SCORE_RAPID_FIRE;
        }
        if self.threat.recent_signature_failures(source_ip) >= SIGNATURE_FAILURE_THRESHOLD {
            indicators.push("repeated_signature_failures".to_string());
            score *= SCORE_REPEATED_SIG_FAILURES;
        }

        // 7. Source reputation.
        let reputation = self.threat.reputation(source_ip);
        match reputation {
            IpReputation::Blocked => {
                self.threat.record_outcome(source_ip, false);
                warn!("Webhook rejected, source is blocked");
                return WebhookValidationResult::rejected(
                    format!("source IP {} is blocked", source_ip),
                    IpReputation::Blocked,
                );
            }
            IpReputation::Suspicious => {
                indicators.push("suspicious_source_reputation".to_string());
                score *= SCORE_SUSPICIOUS_REPUTATION;
            }
            IpReputation::Trusted | IpReputation::Neutral => {}
        }

        self.threat.record_outcome(source_ip, true);
        let (event_id, event_type) = extract_event(payload);
        debug!(
            event_id = event_id.as_deref().unwrap_or("-"),
            score,
            indicators = indicators.len(),
            "Webhook validated"
        );

        WebhookValidationResult {
            is_valid: true,
            event_id,
            event_type,
            security_score: score.clamp(0.0, 1.0),
            ip_reputation: reputation,
            error_message: None,
            rate_limit_info,
            threat_indicators: indicators,
        }
    }

    async fn inbound_window_count(
        &self,
        provider: ProviderId,
        source_ip: IpAddr,
    ) -> Result<u64, crate::error::ReliabilityError> {
        let key = format!("webhook:rate:{}:{}", provider, source_ip);
        self.store
            .window_count(&key, unix_millis(), Duration::from_secs(60))
            .await
    }
}
