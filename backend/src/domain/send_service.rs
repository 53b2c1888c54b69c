//! Single-send and campaign-send orchestration.
//!
//! The service is the DEFER-aware enqueue path shared by the HTTP API and the
//! campaign expander: the compliance gate decides, and the decision maps onto
//! an immediate job, a delayed job, or a structured rejection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::info;

use crate::domain::campaign::CampaignId;
use crate::domain::compliance::{ComplianceGate, Decision};
use crate::domain::contact::ContactId;
use crate::domain::error::Error;
use crate::domain::location::LocationId;
use crate::domain::message::MessageKind;
use crate::domain::ports::{
    CampaignJobPayload, DeliveryQueue, EnqueueOptions, JobId, QueueError, QueueJob, SmsJobPayload,
};
use crate::domain::tenant::TenantId;

/// Caller-facing request for a single SMS send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendSmsRequest {
    pub contact_id: ContactId,
    pub location_id: Option<LocationId>,
    pub content: String,
    pub campaign_id: Option<CampaignId>,
}

/// Outcome of a send request.
#[derive(Debug, Clone, PartialEq)]
pub enum SendDecision {
    /// The job was accepted; `deferred_until` is set when quiet hours pushed
    /// the first dispatch into the future.
    Queued {
        job_id: JobId,
        deferred_until: Option<DateTime<Utc>>,
    },
    /// The compliance gate refused the send.
    Blocked { reasons: Vec<String> },
}

/// Orchestrates gate evaluation and queue admission.
pub struct SendService {
    gate: Arc<ComplianceGate>,
    queue: Arc<dyn DeliveryQueue>,
    clock: Arc<dyn Clock>,
}

impl SendService {
    /// Build the service over its collaborators.
    pub fn new(
        gate: Arc<ComplianceGate>,
        queue: Arc<dyn DeliveryQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { gate, queue, clock }
    }

    /// Evaluate and enqueue one SMS send.
    ///
    /// A block is a structured outcome, not an error; store and queue
    /// failures are errors.
    pub async fn send_sms(
        &self,
        tenant: TenantId,
        request: SendSmsRequest,
    ) -> Result<SendDecision, Error> {
        let evaluation = self
            .gate
            .evaluate(tenant, request.contact_id, MessageKind::Sms)
            .await?;

        let scan = self.gate.scan_content(&request.content, None);
        if !scan.approved {
            // Advisory only: recorded for audit, never blocking.
            info!(
                contact_id = %request.contact_id,
                issues = ?scan.issues,
                "content scan flagged message copy"
            );
        }

        match evaluation.decision {
            Decision::Block => Ok(SendDecision::Blocked {
                reasons: evaluation.reasons,
            }),
            Decision::Allow => {
                let job_id = self
                    .enqueue_sms(tenant, &request, EnqueueOptions::immediate())
                    .await?;
                Ok(SendDecision::Queued {
                    job_id,
                    deferred_until: None,
                })
            }
            Decision::Defer { retry_after } => {
                let delay = (retry_after - self.clock.utc())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let job_id = self
                    .enqueue_sms(tenant, &request, EnqueueOptions::delayed(delay))
                    .await?;
                Ok(SendDecision::Queued {
                    job_id,
                    deferred_until: Some(retry_after),
                })
            }
        }
    }

    /// Enqueue a campaign expansion job.
    ///
    /// Expansion runs once: re-running a partially expanded campaign would
    /// enqueue duplicate sends, so the job gets a single attempt.
    pub async fn send_campaign(
        &self,
        tenant: TenantId,
        campaign_id: CampaignId,
    ) -> Result<JobId, Error> {
        self.queue
            .enqueue(
                QueueJob::Campaign(CampaignJobPayload {
                    tenant_id: tenant,
                    campaign_id,
                }),
                EnqueueOptions::immediate().single_attempt(),
            )
            .await
            .map_err(map_queue_error)
    }

    async fn enqueue_sms(
        &self,
        tenant: TenantId,
        request: &SendSmsRequest,
        opts: EnqueueOptions,
    ) -> Result<JobId, Error> {
        self.queue
            .enqueue(
                QueueJob::Sms(SmsJobPayload {
                    tenant_id: tenant,
                    contact_id: request.contact_id,
                    location_id: request.location_id,
                    content: request.content.clone(),
                    campaign_id: request.campaign_id,
                }),
                opts,
            )
            .await
            .map_err(map_queue_error)
    }
}

fn map_queue_error(error: QueueError) -> Error {
    match error {
        QueueError::Unavailable { message } => Error::service_unavailable(message),
        QueueError::Payload { message } => Error::internal(message),
    }
}
