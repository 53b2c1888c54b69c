//! Worker runtime: bounded worker loops and the delayed-job scheduler.
//!
//! One scheduler loop and one worker loop run per job kind. Workers hold a
//! semaphore permit per in-flight job (10 for SMS, 2 for campaign expansion
//! by default) and take a token from the shared bucket before every pop, so
//! dispatch throughput respects the carrier limit across all loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{JobHandler, JobKind, JobOutcome};

use super::limiter::TokenBucket;
use super::redis_queue::{JobRecord, RedisDeliveryQueue};

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub sms_concurrency: usize,
    pub campaign_concurrency: usize,
    /// Idle sleep between empty polls, and the scheduler cadence.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            sms_concurrency: 10,
            campaign_concurrency: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What to do with a job whose handler returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

fn next_retry(record: &JobRecord) -> RetryDecision {
    let attempt = record.attempt + 1;
    if attempt < record.opts.attempts_max {
        RetryDecision::Retry {
            attempt,
            delay: record.opts.backoff.delay_after(attempt),
        }
    } else {
        RetryDecision::GiveUp
    }
}

/// Drives job handlers against the Redis queue.
pub struct QueueRuntime {
    queue: RedisDeliveryQueue,
    handler: Arc<dyn JobHandler>,
    limiter: Arc<TokenBucket>,
    config: WorkerPoolConfig,
}

impl QueueRuntime {
    /// Build a runtime over the queue, the routed handlers, and the limiter.
    pub fn new(
        queue: RedisDeliveryQueue,
        handler: Arc<dyn JobHandler>,
        limiter: Arc<TokenBucket>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            limiter,
            config,
        }
    }

    /// Spawn every scheduler and worker loop; returns their join handles.
    ///
    /// Loops run until the process exits: jobs terminate by completion or
    /// attempt exhaustion, and no in-flight cancellation is exposed.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (kind, concurrency) in [
            (JobKind::Sms, self.config.sms_concurrency),
            (JobKind::Campaign, self.config.campaign_concurrency),
        ] {
            let runtime = self.clone();
            handles.push(tokio::spawn(async move {
                runtime.scheduler_loop(kind).await;
            }));
            let runtime = self.clone();
            handles.push(tokio::spawn(async move {
                runtime.worker_loop(kind, concurrency).await;
            }));
        }
        info!(
            sms_concurrency = self.config.sms_concurrency,
            campaign_concurrency = self.config.campaign_concurrency,
            "delivery workers started"
        );
        handles
    }

    /// Promote due delayed jobs on a fixed cadence.
    async fn scheduler_loop(&self, kind: JobKind) {
        loop {
            match self.queue.promote_due(kind).await {
                Ok(0) => {}
                Ok(promoted) => debug!(kind = kind.as_str(), promoted, "promoted delayed jobs"),
                Err(error) => warn!(kind = kind.as_str(), error = %error, "scheduler poll failed"),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn worker_loop(self: Arc<Self>, kind: JobKind, concurrency: usize) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        loop {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                // The semaphore only closes on shutdown.
                return;
            };

            if let Err(wait) = self.limiter.try_acquire() {
                drop(permit);
                tokio::time::sleep(wait).await;
                continue;
            }

            match self.queue.pop_ready(kind).await {
                Ok(Some(record)) => {
                    let runtime = self.clone();
                    tokio::spawn(async move {
                        runtime.process_record(record).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(error) => {
                    drop(permit);
                    warn!(kind = kind.as_str(), error = %error, "queue poll failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn process_record(&self, record: JobRecord) {
        match self.handler.handle(&record.job).await {
            Ok(JobOutcome::Completed) => {
                debug!(job_id = %record.id, "job completed");
            }
            // A structured block is a business outcome, not a transport
            // failure: the job finalizes successfully and is never retried.
            Ok(JobOutcome::Blocked { reasons }) => {
                info!(job_id = %record.id, ?reasons, "job finalized as blocked");
            }
            // Deferral at dispatch time: finalize this invocation and hand a
            // fresh delayed job to the queue.
            Ok(JobOutcome::Rescheduled { delay }) => {
                let fresh = JobRecord {
                    attempt: 0,
                    ..record
                };
                if let Err(error) = self.queue.push(&fresh, delay).await {
                    error!(job_id = %fresh.id, error = %error, "failed to reschedule job");
                } else {
                    debug!(job_id = %fresh.id, ?delay, "job rescheduled");
                }
            }
            Err(handler_error) => match next_retry(&record) {
                RetryDecision::Retry { attempt, delay } => {
                    warn!(
                        job_id = %record.id,
                        attempt,
                        ?delay,
                        error = %handler_error,
                        "job failed, retrying with backoff"
                    );
                    let retry = JobRecord { attempt, ..record };
                    if let Err(error) = self.queue.push(&retry, delay).await {
                        error!(job_id = %retry.id, error = %error, "failed to schedule retry");
                    }
                }
                RetryDecision::GiveUp => {
                    error!(
                        job_id = %record.id,
                        attempts = record.opts.attempts_max,
                        error = %handler_error,
                        "job failed permanently, attempts exhausted"
                    );
                }
            },
        }
    }
}
