//! Inbound reconciliation: carrier webhooks advancing message and contact state.
//!
//! Two entry points mirror the two webhook families: delivery status receipts
//! for outbound messages, and inbound texts. Inbound texts drive the audited
//! opt-out round trip: flag the contact, append the audit log, maintain the
//! cross-tenant opt-out table, and send the confirmation text.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::warn;

use crate::domain::campaign::CounterField;
use crate::domain::contact::{ConsentMethod, Contact};
use crate::domain::error::Error;
use crate::domain::message::{MessageId, MessageKind, MessageStatus};
use crate::domain::opt_out::{KeywordSets, OptOutAction, OptOutLogEntry};
use crate::domain::phone;
use crate::domain::ports::{
    CampaignRepository, CampaignRepositoryError, ContactRepository, ContactRepositoryError,
    LocationRepository, LocationRepositoryError, MessageRepository, MessageRepositoryError,
    NewInboundSms, NewOutboundSms, OptOutRepository, OptOutRepositoryError, SenderIdentity,
    SmsProvider, StatusUpdate,
};
use crate::domain::tenant::TenantId;

/// Text sent back after a keyword opt-out.
pub const OPT_OUT_CONFIRMATION: &str =
    "You have been unsubscribed and will receive no further messages. Reply START to re-subscribe.";

/// Text sent back after a keyword opt-in.
pub const OPT_IN_CONFIRMATION: &str =
    "You are subscribed again. Reply STOP at any time to unsubscribe.";

/// Result of processing a status webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The row moved to the translated status.
    Updated(MessageStatus),
    /// The row already held the status, or a terminal status refused the
    /// regression; nothing changed.
    Unchanged(MessageStatus),
    /// The provider status has no internal translation; only the raw text
    /// was recorded.
    Untranslated,
    /// No message matches the provider id.
    UnknownMessage,
}

/// Result of processing an inbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    OptedOut,
    OptedIn,
    Received,
    /// The destination number maps to no location; nothing was persisted.
    UnknownDestination,
}

/// Webhook business logic over the domain ports.
pub struct InboundReconciler {
    contacts: Arc<dyn ContactRepository>,
    locations: Arc<dyn LocationRepository>,
    messages: Arc<dyn MessageRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    opt_outs: Arc<dyn OptOutRepository>,
    provider: Arc<dyn SmsProvider>,
    clock: Arc<dyn Clock>,
    keywords: KeywordSets,
}

impl InboundReconciler {
    /// Build a reconciler over its collaborators.
    #[expect(clippy::too_many_arguments, reason = "explicit port wiring")]
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        locations: Arc<dyn LocationRepository>,
        messages: Arc<dyn MessageRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        opt_outs: Arc<dyn OptOutRepository>,
        provider: Arc<dyn SmsProvider>,
        clock: Arc<dyn Clock>,
        keywords: KeywordSets,
    ) -> Self {
        Self {
            contacts,
            locations,
            messages,
            campaigns,
            opt_outs,
            provider,
            clock,
            keywords,
        }
    }

    /// Apply a delivery status receipt to its message row.
    ///
    /// The lookup crosses tenants: provider ids are globally unique and the
    /// webhook carries no tenant context. Campaign counters advance when the
    /// row changed or on the carrier's first report of a row (the worker
    /// already stamped `sent` at dispatch, so the `sent` receipt arrives with
    /// the row unchanged); replays find the provider status already recorded
    /// and cannot inflate a counter.
    pub async fn on_status(
        &self,
        provider_message_id: &str,
        provider_status: &str,
        error: Option<String>,
    ) -> Result<StatusOutcome, Error> {
        let Some(message) = self
            .messages
            .find_by_provider_id(provider_message_id)
            .await
            .map_err(map_message_error)?
        else {
            warn!(provider_message_id, "status receipt for unknown message");
            return Ok(StatusOutcome::UnknownMessage);
        };

        let first_carrier_report = message.provider_status.is_none();
        let translated = translate_provider_status(provider_status);
        let status = translated.unwrap_or(message.status);
        let now = self.clock.utc();
        let update = StatusUpdate {
            status,
            provider_status: Some(provider_status.to_string()),
            error_message: error,
            delivered_at: (status == MessageStatus::Delivered).then_some(now),
            at: now,
        };

        let applied = self
            .messages
            .apply_status(message.tenant_id, message.id, update)
            .await
            .map_err(map_message_error)?;

        if let (Some(campaign_id), Some(translated_status)) =
            (applied.message.campaign_id, translated)
        {
            if applied.changed || first_carrier_report {
                let field = match translated_status {
                    MessageStatus::Sent => Some(CounterField::Sent),
                    MessageStatus::Delivered => Some(CounterField::Delivered),
                    MessageStatus::Failed => Some(CounterField::Failed),
                    _ => None,
                };
                if let Some(field) = field {
                    self.campaigns
                        .increment_counter(applied.message.tenant_id, campaign_id, field)
                        .await
                        .map_err(map_campaign_error)?;
                }
            }
        }

        if applied.changed {
            Ok(StatusOutcome::Updated(status))
        } else if translated.is_none() {
            Ok(StatusOutcome::Untranslated)
        } else {
            Ok(StatusOutcome::Unchanged(applied.message.status))
        }
    }

    /// Process an inbound text addressed to one of our sending numbers.
    pub async fn on_inbound(
        &self,
        from: &str,
        to: &str,
        text: &str,
        provider_message_id: &str,
    ) -> Result<InboundAction, Error> {
        let from = phone::normalize(from);
        let to = phone::normalize(to);

        let Some(handle) = self
            .locations
            .resolve_by_sms_number(&to)
            .await
            .map_err(map_location_error)?
        else {
            warn!(to = %to, "inbound message for unknown destination number");
            return Ok(InboundAction::UnknownDestination);
        };
        let tenant = handle.tenant_id;

        let contact = self
            .contacts
            .find_by_phone(tenant, &from)
            .await
            .map_err(map_contact_error)?;

        let now = self.clock.utc();
        let inbound = self
            .messages
            .insert_inbound(
                tenant,
                NewInboundSms {
                    contact_id: contact.as_ref().map(|contact| contact.id),
                    to_address: to.clone(),
                    from_address: from.clone(),
                    content: text.to_string(),
                    provider_message_id: Some(provider_message_id.to_string()),
                },
                now,
            )
            .await
            .map_err(map_message_error)?;

        match self.keywords.classify(text) {
            Some(OptOutAction::OptOut) => {
                self.apply_opt_out(tenant, &to, contact.as_ref(), &from, inbound.id)
                    .await?;
                Ok(InboundAction::OptedOut)
            }
            Some(OptOutAction::OptIn) => {
                self.apply_opt_in(tenant, &to, contact.as_ref(), &from, inbound.id)
                    .await?;
                Ok(InboundAction::OptedIn)
            }
            None => Ok(InboundAction::Received),
        }
    }

    async fn apply_opt_out(
        &self,
        tenant: TenantId,
        sending_number: &str,
        contact: Option<&Contact>,
        from: &str,
        source_message_id: MessageId,
    ) -> Result<(), Error> {
        let now = self.clock.utc();
        if let Some(contact) = contact {
            self.contacts
                .record_opt_out(tenant, contact.id, now)
                .await
                .map_err(map_contact_error)?;
        }
        self.append_log(
            tenant,
            from,
            OptOutAction::OptOut,
            contact,
            source_message_id,
            now,
        )
        .await?;
        self.opt_outs
            .record_global(from, tenant, now)
            .await
            .map_err(map_opt_out_error)?;
        self.send_confirmation(tenant, sending_number, contact, from, OPT_OUT_CONFIRMATION)
            .await;
        Ok(())
    }

    async fn apply_opt_in(
        &self,
        tenant: TenantId,
        sending_number: &str,
        contact: Option<&Contact>,
        from: &str,
        source_message_id: MessageId,
    ) -> Result<(), Error> {
        let now = self.clock.utc();
        if let Some(contact) = contact {
            self.contacts
                .record_opt_in(tenant, contact.id, now, ConsentMethod::KeywordReply)
                .await
                .map_err(map_contact_error)?;
        }
        self.append_log(
            tenant,
            from,
            OptOutAction::OptIn,
            contact,
            source_message_id,
            now,
        )
        .await?;
        self.opt_outs
            .clear_global(from)
            .await
            .map_err(map_opt_out_error)?;
        self.send_confirmation(tenant, sending_number, contact, from, OPT_IN_CONFIRMATION)
            .await;
        Ok(())
    }

    async fn append_log(
        &self,
        tenant: TenantId,
        address: &str,
        action: OptOutAction,
        contact: Option<&Contact>,
        source_message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.opt_outs
            .append_log(
                tenant,
                &OptOutLogEntry {
                    channel: MessageKind::Sms,
                    address: address.to_string(),
                    action,
                    method: ConsentMethod::KeywordReply,
                    contact_id: contact.map(|contact| contact.id),
                    source_message_id: Some(source_message_id),
                },
                at,
            )
            .await
            .map_err(map_opt_out_error)
    }

    /// Send the opt-out or opt-in confirmation text.
    ///
    /// This path deliberately bypasses the compliance gate: it targets the
    /// phone that just texted us, not a consenting contact, so the audit row
    /// carries no consent timestamps. A failed confirmation is logged and
    /// swallowed; it must not fail webhook processing.
    async fn send_confirmation(
        &self,
        tenant: TenantId,
        sending_number: &str,
        contact: Option<&Contact>,
        to: &str,
        text: &str,
    ) {
        // Reply from the number the recipient texted.
        let from = SenderIdentity::PhoneNumber(sending_number.to_string());

        let now = self.clock.utc();
        let row = match self
            .messages
            .insert_outbound(
                tenant,
                NewOutboundSms {
                    contact_id: contact.map(|contact| contact.id),
                    campaign_id: None,
                    to_address: to.to_string(),
                    from_address: sender_address(&from),
                    content: text.to_string(),
                    consent_verified_at: None,
                    quiet_hours_checked_at: None,
                },
                now,
            )
            .await
        {
            Ok(row) => row,
            Err(error) => {
                warn!(error = %error, "failed to record confirmation message");
                return;
            }
        };

        match self.provider.send(to, &from, text).await {
            Ok(receipt) => {
                if let Err(error) = self
                    .messages
                    .mark_sent(
                        tenant,
                        row.id,
                        &receipt.provider_message_id,
                        receipt.segments,
                        self.clock.utc(),
                    )
                    .await
                {
                    warn!(error = %error, "failed to finalize confirmation message");
                }
            }
            Err(error) => {
                let provider_text = error.to_string();
                if let Err(error) = self
                    .messages
                    .mark_failed(tenant, row.id, &provider_text, self.clock.utc())
                    .await
                {
                    warn!(error = %error, "failed to record confirmation failure");
                }
                warn!(error = %provider_text, "confirmation dispatch failed");
            }
        }
    }
}

/// Translate a carrier status into the internal lifecycle.
///
/// Unknown carrier values with an internal spelling pass through; anything
/// else yields `None` and leaves the row's status untouched.
pub fn translate_provider_status(raw: &str) -> Option<MessageStatus> {
    match raw {
        "delivery_failed" => Some(MessageStatus::Failed),
        "delivery_unconfirmed" => Some(MessageStatus::Sent),
        other => other.parse().ok(),
    }
}

fn sender_address(from: &SenderIdentity) -> String {
    match from {
        SenderIdentity::PhoneNumber(number) => number.clone(),
        SenderIdentity::MessagingProfile(profile) => profile.clone(),
    }
}

fn map_contact_error(error: ContactRepositoryError) -> Error {
    match error {
        ContactRepositoryError::Connection { message } => Error::service_unavailable(message),
        ContactRepositoryError::Query { message } => Error::internal(message),
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

fn map_opt_out_error(error: OptOutRepositoryError) -> Error {
    match error {
        OptOutRepositoryError::Connection { message } => Error::service_unavailable(message),
        OptOutRepositoryError::Query { message } => Error::internal(message),
    }
}

#[cfg(test)]
mod tests;
