//! Port describing the durable, delayed delivery queue.
//!
//! The queue is at-least-once: a job becomes visible to workers once its
//! delay elapses, survives process restarts, and is retried with exponential
//! backoff when its handler errors. Handler results distinguish transport
//! failure (retry) from terminal business outcomes (no retry).

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::campaign::CampaignId;
use crate::domain::contact::ContactId;
use crate::domain::location::LocationId;
use crate::domain::tenant::TenantId;

/// Errors surfaced by queue adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Queue infrastructure is unavailable.
    #[error("delivery queue is unavailable: {message}")]
    Unavailable { message: String },
    /// The job payload could not be encoded or decoded.
    #[error("delivery job payload rejected: {message}")]
    Payload { message: String },
}

impl QueueError {
    /// Create an unavailability error with the given message.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a payload error with the given message.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }
}

/// Identifier handed back to callers when a job is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue partition a job belongs to; each kind has its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Sms,
    Campaign,
}

impl JobKind {
    /// Stable representation used in queue key names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Campaign => "campaign",
        }
    }
}

/// Payload of a single-recipient SMS delivery job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsJobPayload {
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub location_id: Option<LocationId>,
    pub content: String,
    pub campaign_id: Option<CampaignId>,
}

/// Payload of a campaign expansion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignJobPayload {
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
}

/// A job accepted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueJob {
    Sms(SmsJobPayload),
    Campaign(CampaignJobPayload),
}

impl QueueJob {
    /// Partition the job dispatches on.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Sms(_) => JobKind::Sms,
            Self::Campaign(_) => JobKind::Campaign,
        }
    }
}

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// `base × 2^attempt`, jitter-free.
    Exponential {
        #[serde(rename = "base_ms")]
        base_ms: u64,
    },
}

impl Backoff {
    /// Delay before retrying after `attempt` completed attempts (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base_ms } => {
                let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }
}

/// Enqueue options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Time the job stays invisible to workers after enqueue.
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
    /// Maximum handler attempts, including the first.
    pub attempts_max: u32,
    pub backoff: Backoff,
}

impl EnqueueOptions {
    /// Immediate dispatch with the default retry policy.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Delay first dispatch by `delay`.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Restrict the job to a single attempt.
    pub fn single_attempt(mut self) -> Self {
        self.attempts_max = 1;
        self
    }
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            attempts_max: 3,
            backoff: Backoff::Exponential { base_ms: 5_000 },
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Handler verdict for one job invocation.
///
/// Only a returned error triggers a retry. `Blocked` is a terminal business
/// outcome (the compliance gate refused the send) and `Rescheduled`
/// finalizes the invocation while enqueueing a fresh delayed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Blocked { reasons: Vec<String> },
    Rescheduled { delay: Duration },
}

/// Port for enqueueing delivery jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Enqueue a job, returning its identifier.
    async fn enqueue(&self, job: QueueJob, opts: EnqueueOptions) -> Result<JobId, QueueError>;
}

/// Contract between the queue runtime and the domain job handlers.
///
/// An `Err` is a transport failure the runtime retries with backoff; every
/// `Ok` variant finalizes the invocation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one job invocation.
    async fn handle(&self, job: &QueueJob) -> Result<JobOutcome, crate::domain::error::Error>;
}

/// In-memory queue that records enqueued jobs without dispatching them.
///
/// Used by unit and scenario tests that assert on enqueue behaviour.
#[derive(Debug, Default)]
pub struct RecordingDeliveryQueue {
    jobs: Mutex<Vec<(QueueJob, EnqueueOptions)>>,
}

impl RecordingDeliveryQueue {
    /// Create an empty recording queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every accepted job in enqueue order.
    pub fn recorded(&self) -> Vec<(QueueJob, EnqueueOptions)> {
        match self.jobs.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Remove and return every accepted job in enqueue order.
    pub fn drain(&self) -> Vec<(QueueJob, EnqueueOptions)> {
        match self.jobs.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl DeliveryQueue for RecordingDeliveryQueue {
    async fn enqueue(&self, job: QueueJob, opts: EnqueueOptions) -> Result<JobId, QueueError> {
        self.jobs
            .lock()
            .map_err(|_| QueueError::unavailable("recording queue mutex poisoned"))?
            .push((job, opts));
        Ok(JobId::random())
    }
}
