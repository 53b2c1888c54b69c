//! SMS delivery worker: the job-handler body of the delivery pipeline.
//!
//! The worker re-runs the compliance gate at dispatch time: the recipient
//! may have opted out, or the clock may have crossed into quiet hours, since
//! the job was enqueued. A dispatch-time block is a terminal business outcome
//! the queue must not retry; a dispatch-time deferral re-enqueues with the
//! new delay; only provider and store failures propagate as retryable errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use tracing::warn;

use crate::domain::campaign_expander::CampaignExpander;
use crate::domain::campaign::CounterField;
use crate::domain::compliance::{ComplianceGate, Decision};
use crate::domain::error::{Error, ErrorCode};
use crate::domain::message::MessageKind;
use crate::domain::ports::{
    CampaignRepository, CampaignRepositoryError, JobHandler, JobOutcome, LocationRepository,
    LocationRepositoryError, MessageRepository, MessageRepositoryError, NewOutboundSms,
    QueueJob, SenderIdentity, SmsJobPayload, SmsProvider,
};

/// Handler for single-recipient SMS delivery jobs.
pub struct SmsDeliveryWorker {
    gate: Arc<ComplianceGate>,
    locations: Arc<dyn LocationRepository>,
    messages: Arc<dyn MessageRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    provider: Arc<dyn SmsProvider>,
    clock: Arc<dyn Clock>,
    /// Sending identity when the resolved location has no dedicated number.
    default_messaging_profile: String,
}

impl SmsDeliveryWorker {
    /// Build a worker over its collaborators.
    pub fn new(
        gate: Arc<ComplianceGate>,
        locations: Arc<dyn LocationRepository>,
        messages: Arc<dyn MessageRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        provider: Arc<dyn SmsProvider>,
        clock: Arc<dyn Clock>,
        default_messaging_profile: String,
    ) -> Self {
        Self {
            gate,
            locations,
            messages,
            campaigns,
            provider,
            clock,
            default_messaging_profile,
        }
    }

    /// Execute one delivery job.
    pub async fn process(&self, job: &SmsJobPayload) -> Result<JobOutcome, Error> {
        let tenant = job.tenant_id;

        let evaluation = match self
            .gate
            .evaluate(tenant, job.contact_id, MessageKind::Sms)
            .await
        {
            Ok(evaluation) => evaluation,
            // A contact deleted between enqueue and dispatch is a terminal
            // outcome, not a transport error worth retrying.
            Err(error) if error.code() == ErrorCode::NotFound => {
                return self
                    .finalize_block(job, vec![error.message().to_string()])
                    .await;
            }
            Err(error) => return Err(error),
        };

        match evaluation.decision {
            Decision::Block => self.finalize_block(job, evaluation.reasons).await,
            Decision::Defer { retry_after } => {
                let delay = (retry_after - self.clock.utc())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                Ok(JobOutcome::Rescheduled { delay })
            }
            Decision::Allow => self.dispatch(job, evaluation.contact).await,
        }
    }

    async fn dispatch(
        &self,
        job: &SmsJobPayload,
        contact: crate::domain::contact::Contact,
    ) -> Result<JobOutcome, Error> {
        let tenant = job.tenant_id;
        let location = match job.location_id.or(contact.primary_location_id) {
            Some(id) => self
                .locations
                .find_by_id(tenant, id)
                .await
                .map_err(map_location_error)?,
            None => None,
        };

        let from = location
            .as_ref()
            .and_then(|location| location.sms_phone_number.clone())
            .map(SenderIdentity::PhoneNumber)
            .unwrap_or_else(|| {
                SenderIdentity::MessagingProfile(self.default_messaging_profile.clone())
            });

        let now = self.clock.utc();
        let row = self
            .messages
            .insert_outbound(
                tenant,
                NewOutboundSms {
                    contact_id: Some(contact.id),
                    campaign_id: job.campaign_id,
                    to_address: contact.phone.clone(),
                    from_address: sender_address(&from),
                    content: job.content.clone(),
                    consent_verified_at: Some(now),
                    quiet_hours_checked_at: Some(now),
                },
                now,
            )
            .await
            .map_err(map_message_error)?;

        match self.provider.send(&contact.phone, &from, &job.content).await {
            Ok(receipt) => {
                self.messages
                    .mark_sent(
                        tenant,
                        row.id,
                        &receipt.provider_message_id,
                        receipt.segments,
                        self.clock.utc(),
                    )
                    .await
                    .map_err(map_message_error)?;
                Ok(JobOutcome::Completed)
            }
            Err(error) => {
                let provider_text = error.to_string();
                self.messages
                    .mark_failed(tenant, row.id, &provider_text, self.clock.utc())
                    .await
                    .map_err(map_message_error)?;
                // Propagate so the queue retries; the audit row already holds
                // the provider's error text.
                Err(Error::service_unavailable(provider_text))
            }
        }
    }

    async fn finalize_block(
        &self,
        job: &SmsJobPayload,
        reasons: Vec<String>,
    ) -> Result<JobOutcome, Error> {
        if let Some(campaign_id) = job.campaign_id {
            // A recipient lost to a dispatch-time block counts against the
            // campaign's opted-out tally so counters still reconcile to the
            // recipient total.
            self.campaigns
                .increment_counter(job.tenant_id, campaign_id, CounterField::OptedOut)
                .await
                .map_err(map_campaign_error)?;
        }
        warn!(
            contact_id = %job.contact_id,
            ?reasons,
            "send blocked at dispatch time"
        );
        Ok(JobOutcome::Blocked { reasons })
    }
}

/// Address persisted on the audit row for a sending identity.
fn sender_address(from: &SenderIdentity) -> String {
    match from {
        SenderIdentity::PhoneNumber(number) => number.clone(),
        SenderIdentity::MessagingProfile(profile) => profile.clone(),
    }
}

/// Routes queue jobs to their handlers.
pub struct DeliveryRouter {
    sms: Arc<SmsDeliveryWorker>,
    campaigns: Arc<CampaignExpander>,
}

impl DeliveryRouter {
    /// Build a router over both handlers.
    pub fn new(sms: Arc<SmsDeliveryWorker>, campaigns: Arc<CampaignExpander>) -> Self {
        Self { sms, campaigns }
    }
}

#[async_trait]
impl JobHandler for DeliveryRouter {
    async fn handle(&self, job: &QueueJob) -> Result<JobOutcome, Error> {
        match job {
            QueueJob::Sms(payload) => self.sms.process(payload).await,
            QueueJob::Campaign(payload) => self.campaigns.process(payload).await,
        }
    }
}

fn map_location_error(error: LocationRepositoryError) -> Error {
    match error {
        LocationRepositoryError::Connection { message } => Error::service_unavailable(message),
        LocationRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_message_error(error: MessageRepositoryError) -> Error {
    match error {
        MessageRepositoryError::Connection { message } => Error::service_unavailable(message),
        MessageRepositoryError::Query { message } => Error::internal(message),
    }
}

fn map_campaign_error(error: CampaignRepositoryError) -> Error {
    match error {
        CampaignRepositoryError::Connection { message } => Error::service_unavailable(message),
        CampaignRepositoryError::Query { message } => Error::internal(message),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::domain::campaign::{
        Campaign, CampaignCounters, CampaignId, CampaignKind, CampaignStatus, CampaignTargeting,
    };
    use crate::domain::compliance::CompliancePolicy;
    use crate::domain::contact::ContactId;
    use crate::domain::location::{Location, LocationId};
    use crate::domain::message::MessageStatus;
    use crate::domain::ports::{NoStateRules, ProviderReceipt, SmsProviderError};
    use crate::domain::tenant::TenantId;
    use crate::test_support::{compliant_contact, InMemoryStore, MutableClock, ScriptedSmsProvider};

    fn daytime() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 19, 0, 0).single().expect("valid instant")
    }

    fn late_evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 2, 5, 0, 0).single().expect("valid instant")
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        provider: Arc<ScriptedSmsProvider>,
        tenant: TenantId,
        worker: SmsDeliveryWorker,
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedSmsProvider::new());
        let clock = Arc::new(MutableClock::new(now));
        let gate = Arc::new(ComplianceGate::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NoStateRules),
            clock.clone(),
            CompliancePolicy::default(),
        ));
        let worker = SmsDeliveryWorker::new(
            gate,
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
            clock,
            "profile-default".to_string(),
        );
        Harness {
            store,
            provider,
            tenant: TenantId::random(),
            worker,
        }
    }

    fn job(tenant: TenantId, contact_id: ContactId) -> SmsJobPayload {
        SmsJobPayload {
            tenant_id: tenant,
            contact_id,
            location_id: None,
            content: "see you this weekend".to_string(),
            campaign_id: None,
        }
    }

    #[tokio::test]
    async fn allowed_job_dispatches_and_marks_sent() {
        let harness = harness(daytime());
        let contact = compliant_contact("+14155551212", daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());

        let outcome = harness
            .worker
            .process(&job(harness.tenant, contact.id))
            .await
            .expect("job should succeed");

        assert_eq!(outcome, JobOutcome::Completed);
        let messages = harness.store.messages();
        assert_eq!(messages.len(), 1);
        let row = &messages[0];
        assert_eq!(row.status, MessageStatus::Sent);
        assert_eq!(row.to_address, "+14155551212");
        assert_eq!(row.from_address, "profile-default");
        assert!(row.provider_message_id.is_some());
        assert_eq!(row.consent_verified_at, Some(daytime()));
        assert_eq!(row.quiet_hours_checked_at, Some(daytime()));
        assert_eq!(harness.provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn location_number_wins_over_messaging_profile() {
        let harness = harness(daytime());
        let location = Location {
            id: LocationId::random(),
            name: "Mission St".to_string(),
            us_state: "CA".to_string(),
            timezone: "America/Los_Angeles".to_string(),
            sms_phone_number: Some("+14155550100".to_string()),
        };
        harness.store.insert_location(harness.tenant, location.clone());
        let mut contact = compliant_contact("+14155551212", daytime());
        contact.primary_location_id = Some(location.id);
        harness.store.insert_contact(harness.tenant, contact.clone());

        harness
            .worker
            .process(&job(harness.tenant, contact.id))
            .await
            .expect("job should succeed");

        let sent = harness.provider.sent();
        assert_eq!(
            sent[0].1,
            SenderIdentity::PhoneNumber("+14155550100".to_string())
        );
        assert_eq!(harness.store.messages()[0].from_address, "+14155550100");
    }

    #[tokio::test]
    async fn dispatch_time_block_is_not_an_error_and_writes_no_row() {
        let harness = harness(daytime());
        let mut contact = compliant_contact("+14155551212", daytime());
        contact.sms_opted_out = true;
        contact.sms_opted_out_at = Some(daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());

        let outcome = harness
            .worker
            .process(&job(harness.tenant, contact.id))
            .await
            .expect("blocked job resolves successfully");

        assert!(matches!(outcome, JobOutcome::Blocked { .. }));
        assert!(harness.store.messages().is_empty());
        assert!(harness.provider.sent().is_empty());
    }

    #[tokio::test]
    async fn campaign_job_blocked_at_dispatch_counts_as_opted_out() {
        let harness = harness(daytime());
        let campaign_id = CampaignId::random();
        harness.store.insert_campaign(
            harness.tenant,
            Campaign {
                id: campaign_id,
                kind: CampaignKind::Sms,
                sms_content: Some("sale".to_string()),
                email_subject: None,
                email_content: None,
                targeting: CampaignTargeting::default(),
                status: CampaignStatus::Sending,
                counters: CampaignCounters::default(),
                scheduled_at: None,
                started_at: None,
                completed_at: None,
            },
        );
        let mut contact = compliant_contact("+14155551212", daytime());
        contact.sms_opted_out = true;
        contact.sms_opted_out_at = Some(daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());

        let mut payload = job(harness.tenant, contact.id);
        payload.campaign_id = Some(campaign_id);
        harness
            .worker
            .process(&payload)
            .await
            .expect("blocked job resolves successfully");

        let campaign = harness
            .store
            .campaign(harness.tenant, campaign_id)
            .expect("campaign exists");
        assert_eq!(campaign.counters.opted_out, 1);
    }

    #[tokio::test]
    async fn quiet_hours_at_dispatch_reschedule_instead_of_retrying() {
        let harness = harness(late_evening());
        let contact = compliant_contact("+14155551212", daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());

        let outcome = harness
            .worker
            .process(&job(harness.tenant, contact.id))
            .await
            .expect("deferred job resolves successfully");

        // 05:00 UTC -> next 08:00 PDT (15:00 UTC) is ten hours out.
        assert_eq!(
            outcome,
            JobOutcome::Rescheduled {
                delay: std::time::Duration::from_secs(10 * 3600)
            }
        );
        assert!(harness.store.messages().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_marks_row_failed_and_propagates() {
        let harness = harness(daytime());
        let contact = compliant_contact("+14155551212", daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());
        harness
            .provider
            .push_result(Err(SmsProviderError::transport("upstream 502")));

        let error = harness
            .worker
            .process(&job(harness.tenant, contact.id))
            .await
            .expect_err("provider failure should propagate");

        assert!(error.message().contains("upstream 502"));
        let messages = harness.store.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert!(messages[0]
            .error_message
            .as_deref()
            .expect("error text recorded")
            .contains("upstream 502"));
    }

    #[tokio::test]
    async fn retry_after_failure_succeeds_with_fresh_audit_row() {
        let harness = harness(daytime());
        let contact = compliant_contact("+14155551212", daytime());
        harness.store.insert_contact(harness.tenant, contact.clone());
        harness
            .provider
            .push_result(Err(SmsProviderError::timeout("deadline exceeded")));
        harness.provider.push_result(Ok(ProviderReceipt {
            provider_message_id: "msg-2".to_string(),
            segments: 2,
        }));

        let payload = job(harness.tenant, contact.id);
        harness
            .worker
            .process(&payload)
            .await
            .expect_err("first attempt fails");
        let outcome = harness
            .worker
            .process(&payload)
            .await
            .expect("second attempt succeeds");

        assert_eq!(outcome, JobOutcome::Completed);
        let messages = harness.store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(messages[1].status, MessageStatus::Sent);
        assert_eq!(messages[1].provider_message_id.as_deref(), Some("msg-2"));
        assert_eq!(messages[1].segments, 2);
    }

    #[tokio::test]
    async fn vanished_contact_finalizes_as_blocked() {
        let harness = harness(daytime());

        let outcome = harness
            .worker
            .process(&job(harness.tenant, ContactId::random()))
            .await
            .expect("missing contact resolves as blocked");

        assert!(matches!(outcome, JobOutcome::Blocked { .. }));
    }
}
