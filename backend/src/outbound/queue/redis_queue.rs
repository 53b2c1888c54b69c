//! Redis-backed delivery queue adapter.
//!
//! Layout per job kind, under one namespace:
//! - `<ns>:<kind>:ready`: list of serialized records visible to workers;
//! - `<ns>:<kind>:delayed`: sorted set of serialized records scored by the
//!   epoch-millisecond instant they become due.
//!
//! Both structures are durable in Redis, so delayed jobs survive worker
//! restarts; the scheduler loop promotes due members into the ready list.
//! Delivery is at-least-once: a record popped by a crashing worker is lost
//! from Redis but the send pipeline's second compliance evaluation and
//! provider-side idempotence keep the blast radius to one job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::domain::ports::{
    DeliveryQueue, EnqueueOptions, JobId, JobKind, QueueError, QueueJob,
};

const DEFAULT_NAMESPACE: &str = "delivery";

/// Serialized queue record: the job plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job: QueueJob,
    pub opts: EnqueueOptions,
    /// Completed handler attempts so far.
    pub attempt: u32,
}

/// Redis adapter implementing the `DeliveryQueue` port, plus the pop and
/// promote primitives the worker runtime drives.
#[derive(Clone)]
pub struct RedisDeliveryQueue {
    conn: ConnectionManager,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl RedisDeliveryQueue {
    /// Connect a single shared client; workers clone the manager handle.
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)
            .map_err(|error| QueueError::unavailable(error.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|error| QueueError::unavailable(error.to_string()))?;
        Ok(Self {
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            clock,
        })
    }

    /// Override the key namespace (used by tests against a shared Redis).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn ready_key(&self, kind: JobKind) -> String {
        format!("{}:{}:ready", self.namespace, kind.as_str())
    }

    fn delayed_key(&self, kind: JobKind) -> String {
        format!("{}:{}:delayed", self.namespace, kind.as_str())
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc().timestamp_millis()
    }

    /// Store a record, delayed or immediately visible.
    pub(crate) async fn push(
        &self,
        record: &JobRecord,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_string(record)
            .map_err(|error| QueueError::payload(error.to_string()))?;
        let kind = record.job.kind();
        let mut conn = self.conn.clone();

        if delay.is_zero() {
            conn.lpush::<_, _, ()>(self.ready_key(kind), payload)
                .await
                .map_err(|error| QueueError::unavailable(error.to_string()))?;
        } else {
            let due = self.now_ms().saturating_add(delay.as_millis().min(i64::MAX as u128) as i64);
            conn.zadd::<_, _, _, ()>(self.delayed_key(kind), payload, due)
                .await
                .map_err(|error| QueueError::unavailable(error.to_string()))?;
        }
        Ok(())
    }

    /// Pop the next visible record for `kind`, if any.
    pub(crate) async fn pop_ready(&self, kind: JobKind) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .rpop(self.ready_key(kind), None)
            .await
            .map_err(|error| QueueError::unavailable(error.to_string()))?;
        payload
            .map(|payload| {
                serde_json::from_str(&payload)
                    .map_err(|error| QueueError::payload(error.to_string()))
            })
            .transpose()
    }

    /// Move every due delayed record into the ready list.
    ///
    /// `ZREM` returns whether this caller removed the member, so concurrent
    /// schedulers promote each record exactly once.
    pub(crate) async fn promote_due(&self, kind: JobKind) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let delayed_key = self.delayed_key(kind);
        let ready_key = self.ready_key(kind);

        let due: Vec<String> = conn
            .zrangebyscore_limit(&delayed_key, "-inf", self.now_ms(), 0, 100)
            .await
            .map_err(|error| QueueError::unavailable(error.to_string()))?;

        let mut promoted = 0_usize;
        for payload in due {
            let removed: i64 = conn
                .zrem(&delayed_key, &payload)
                .await
                .map_err(|error| QueueError::unavailable(error.to_string()))?;
            if removed == 0 {
                continue;
            }
            conn.lpush::<_, _, ()>(&ready_key, payload)
                .await
                .map_err(|error| QueueError::unavailable(error.to_string()))?;
            promoted += 1;
        }
        Ok(promoted)
    }
}

#[async_trait]
impl DeliveryQueue for RedisDeliveryQueue {
    async fn enqueue(&self, job: QueueJob, opts: EnqueueOptions) -> Result<JobId, QueueError> {
        let record = JobRecord {
            id: JobId::random(),
            job,
            opts,
            attempt: 0,
        };
        self.push(&record, opts.delay).await?;
        Ok(record.id)
    }
}
