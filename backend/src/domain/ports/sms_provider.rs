//! Port for the upstream SMS carrier.

use std::fmt;

use async_trait::async_trait;

/// Errors raised by provider adapters. The carrier's own error text is
/// preserved in the message so failed sends stay diagnosable from the
/// message audit row alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmsProviderError {
    /// The request did not complete within the dispatch timeout.
    #[error("carrier request timed out: {message}")]
    Timeout { message: String },
    /// The request failed below the HTTP layer or with a 5xx status.
    #[error("carrier transport error: {message}")]
    Transport { message: String },
    /// The carrier rejected the message (4xx status).
    #[error("carrier rejected message: {message}")]
    Rejected { message: String },
    /// The carrier response could not be decoded.
    #[error("carrier response invalid: {message}")]
    Decode { message: String },
}

impl SmsProviderError {
    /// Create a timeout error with the given message.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a transport error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a rejection error with the given message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a decode error with the given message.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Sending identity for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderIdentity {
    /// A location's dedicated sending number.
    PhoneNumber(String),
    /// The tenant-default messaging profile registered with the carrier.
    MessagingProfile(String),
}

impl fmt::Display for SenderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhoneNumber(number) => write!(f, "number {number}"),
            Self::MessagingProfile(profile) => write!(f, "profile {profile}"),
        }
    }
}

/// Carrier acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    /// Carrier-assigned message identifier, globally unique.
    pub provider_message_id: String,
    /// Billable segment count reported by the carrier.
    pub segments: i32,
}

/// Port for dispatching a single message to the carrier.
///
/// Adapters are stateless and safe to call concurrently up to the worker pool
/// size; throughput shaping is the queue limiter's job, not the adapter's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Dispatch one message and return the carrier's receipt.
    async fn send(
        &self,
        to: &str,
        from: &SenderIdentity,
        content: &str,
    ) -> Result<ProviderReceipt, SmsProviderError>;
}
