//! Campaign expansion: resolve targeting to recipients, one send job each.
//!
//! Expansion reuses the DEFER-aware single-send path, so each recipient's
//! quiet hours produce a per-recipient delayed job rather than one
//! campaign-wide delay. Individual send outcomes then advance the campaign
//! counters asynchronously through reconciliation.

use std::sync::Arc;

use mockable::Clock;
use tracing::{info, warn};

use crate::domain::error::Error;
use crate::domain::ports::{
    CampaignJobPayload, CampaignRepository, CampaignRepositoryError, ContactRepository,
    ContactRepositoryError, JobOutcome,
};
use crate::domain::send_service::{SendDecision, SendService, SendSmsRequest};

/// Handler for campaign expansion jobs.
pub struct CampaignExpander {
    campaigns: Arc<dyn CampaignRepository>,
    contacts: Arc<dyn ContactRepository>,
    send: Arc<SendService>,
    clock: Arc<dyn Clock>,
}

impl CampaignExpander {
    /// Build an expander over its collaborators.
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        contacts: Arc<dyn ContactRepository>,
        send: Arc<SendService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            send,
            clock,
        }
    }

    /// Expand one campaign.
    ///
    /// A missing campaign fails the job; there is nothing a retry could
    /// recover, and campaign jobs are enqueued with a single attempt.
    pub async fn process(&self, job: &CampaignJobPayload) -> Result<JobOutcome, Error> {
        let tenant = job.tenant_id;
        let campaign = self
            .campaigns
            .find_by_id(tenant, job.campaign_id)
            .await
            .map_err(map_campaign_error)?
            .ok_or_else(|| Error::not_found(format!("campaign {} not found", job.campaign_id)))?;

        if !campaign.kind.touches_sms() {
            // The email channel has no send path yet; mirror the SMS design
            // when it lands.
            return Err(Error::invalid_request(format!(
                "campaign {} has no SMS channel",
                campaign.id
            )));
        }
        let content = campaign.sms_content.clone().ok_or_else(|| {
            Error::invalid_request(format!("campaign {} has no SMS content", campaign.id))
        })?;

        let recipients = self
            .contacts
            .find_campaign_recipients(tenant, campaign.kind, &campaign.targeting)
            .await
            .map_err(map_contact_error)?;

        self.campaigns
            .mark_sending(
                tenant,
                campaign.id,
                recipients.len() as u32,
                self.clock.utc(),
            )
            .await
            .map_err(map_campaign_error)?;

        for recipient in &recipients {
            let request = SendSmsRequest {
                contact_id: recipient.id,
                location_id: recipient.primary_location_id,
                content: content.clone(),
                campaign_id: Some(campaign.id),
            };
            match self.send.send_sms(tenant, request).await {
                Ok(SendDecision::Queued { .. }) => {}
                Ok(SendDecision::Blocked { reasons }) => {
                    // The recipient query already excluded non-consenting
                    // contacts; a block here means state changed mid-flight.
                    warn!(
                        campaign_id = %campaign.id,
                        contact_id = %recipient.id,
                        ?reasons,
                        "campaign recipient blocked during expansion"
                    );
                }
                Err(error) => {
                    warn!(
                        campaign_id = %campaign.id,
                        contact_id = %recipient.id,
                        error = %error,
                        "failed to enqueue campaign recipient"
                    );
                }
            }
        }

        self.campaigns
            .mark_sent(tenant, campaign.id, self.clock.utc())
            .await
            .map_err(map_campaign_error)?;

        info!(
            campaign_id = %campaign.id,
            recipients = recipients.len(),
            "campaign expanded"
        );
        Ok(JobOutcome::Completed)
    }
}

fn map_campaign_error(error: CampaignRepositoryError) -> Error {
    match error {
        CampaignRepositoryError::Connection { message } => Error::service_unavailable(message),
        CampaignRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_contact_error(error: ContactRepositoryError) -> Error {
    match error {
        ContactRepositoryError::Connection { message } => Error::service_unavailable(message),
        ContactRepositoryError::Query { message } => Error::internal(message),
    }
}
