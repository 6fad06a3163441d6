//! Inbound webhook security
//!
//! Validation pipeline for deliveries pushed to us by providers: source
//! address checks, signature verification, replay detection, payload
//! heuristics and source reputation. See [`validator::WebhookValidator`] for
//! the pipeline itself and [`threat::ThreatTracker`] for the behavioral
//! state behind it.

pub mod threat;
pub mod validator;

pub use threat::ThreatTracker;
pub use validator::{
    SignatureConfig, SignatureScheme, WebhookValidator, DEFAULT_INBOUND_LIMIT_PER_MINUTE,
    MAX_PAYLOAD_BYTES, REPLAY_TTL,
};
