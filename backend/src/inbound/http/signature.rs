//! Ed25519 webhook signature verification.
//!
//! The carrier signs `"<timestamp>|<raw body>"` with its Ed25519 key and
//! sends the base64 signature plus the unix timestamp as headers. The raw
//! body bytes are verified before any JSON parsing, and the timestamp must be
//! fresh so captured payloads cannot be replayed later.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use mockable::Clock;
use thiserror::Error;

/// Maximum accepted skew between the signature timestamp and now.
const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Verification failures; all map to a rejected webhook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookVerifyError {
    /// The configured public key is not a valid Ed25519 key.
    #[error("invalid webhook public key: {message}")]
    InvalidKey { message: String },
    /// A required header is missing or unreadable.
    #[error("missing or unreadable webhook header: {name}")]
    MissingHeader { name: String },
    /// The timestamp header is not a unix timestamp or is out of tolerance.
    #[error("webhook timestamp rejected: {message}")]
    StaleTimestamp { message: String },
    /// The signature header is not valid base64/Ed25519 material.
    #[error("malformed webhook signature: {message}")]
    MalformedSignature { message: String },
    /// The signature does not match the payload.
    #[error("webhook signature mismatch")]
    Mismatch,
}

impl WebhookVerifyError {
    /// Create a missing-header error.
    pub fn missing_header(name: impl Into<String>) -> Self {
        Self::MissingHeader { name: name.into() }
    }
}

/// Verifier bound to the carrier's public key.
pub struct WebhookVerifier {
    key: VerifyingKey,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl WebhookVerifier {
    /// Build a verifier from the base64-encoded public key in configuration.
    pub fn new(
        public_key_base64: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WebhookVerifyError> {
        let bytes = BASE64
            .decode(public_key_base64.trim())
            .map_err(|error| WebhookVerifyError::InvalidKey {
                message: error.to_string(),
            })?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WebhookVerifyError::InvalidKey {
                message: "key must be 32 bytes".to_string(),
            })?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|error| {
            WebhookVerifyError::InvalidKey {
                message: error.to_string(),
            }
        })?;
        Ok(Self {
            key,
            tolerance: DEFAULT_TOLERANCE,
            clock,
        })
    }

    /// Override the freshness tolerance.
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verify a signature over the raw request body.
    pub fn verify(
        &self,
        timestamp: &str,
        signature_base64: &str,
        body: &[u8],
    ) -> Result<(), WebhookVerifyError> {
        let signed_at: i64 =
            timestamp
                .parse()
                .map_err(|_| WebhookVerifyError::StaleTimestamp {
                    message: format!("not a unix timestamp: {timestamp}"),
                })?;
        let now = self.clock.utc().timestamp();
        let skew = (now - signed_at).unsigned_abs();
        if skew > self.tolerance.as_secs() {
            return Err(WebhookVerifyError::StaleTimestamp {
                message: format!("skew of {skew}s exceeds tolerance"),
            });
        }

        let signature_bytes = BASE64.decode(signature_base64.trim()).map_err(|error| {
            WebhookVerifyError::MalformedSignature {
                message: error.to_string(),
            }
        })?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|error| {
            WebhookVerifyError::MalformedSignature {
                message: error.to_string(),
            }
        })?;

        let mut payload = Vec::with_capacity(timestamp.len() + 1 + body.len());
        payload.extend_from_slice(timestamp.as_bytes());
        payload.push(b'|');
        payload.extend_from_slice(body);

        self.key
            .verify_strict(&payload, &signature)
            .map_err(|_| WebhookVerifyError::Mismatch)
    }
}
