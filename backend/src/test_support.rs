//! Test utilities for the backend crate.
//!
//! Shared helpers for both unit tests (in `src/`) and integration tests (in
//! `tests/`): a mutable clock, an in-memory implementation of every
//! repository port, and a scriptable carrier adapter.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;
use uuid::Uuid;

use crate::domain::campaign::{Campaign, CampaignId, CampaignTargeting, CounterField};
use crate::domain::contact::{ConsentMethod, Contact, ContactId};
use crate::domain::location::{Location, LocationId};
use crate::domain::message::{
    Message, MessageDirection, MessageId, MessageKind, MessageStatus,
};
use crate::domain::opt_out::OptOutLogEntry;
use crate::domain::ports::{
    AppliedStatus, CampaignRepository, CampaignRepositoryError, ContactRepository,
    ContactRepositoryError, LocationHandle, LocationRepository, LocationRepositoryError,
    MessageRepository, MessageRepositoryError, NewInboundSms, NewOutboundSms, OptOutRepository,
    OptOutRepositoryError, ProviderReceipt, SenderIdentity, SmsProvider, SmsProviderError,
    StatusUpdate,
};
use crate::domain::tenant::TenantId;

/// Clock whose instant tests can advance explicitly.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        if let Ok(delta) = TimeDelta::from_std(delta) {
            *self.lock_clock() += delta;
        }
    }

    /// Replace the clock's instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex poisoned"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

#[derive(Default)]
struct StoreState {
    contacts: HashMap<(TenantId, Uuid), Contact>,
    locations: HashMap<(TenantId, Uuid), Location>,
    campaigns: HashMap<(TenantId, Uuid), Campaign>,
    messages: Vec<Message>,
    opt_out_log: Vec<(TenantId, OptOutLogEntry, DateTime<Utc>)>,
    global_opt_outs: HashMap<String, (TenantId, DateTime<Utc>)>,
}

/// In-memory implementation of every repository port.
///
/// Mirrors the semantics of the Diesel adapters (tenant scoping on every
/// lookup, the terminal-status regression guard, conflict-ignoring global
/// opt-out writes) so scenario tests exercise the same behaviour the
/// production store provides.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("store mutex poisoned"),
        }
    }

    /// Seed a contact.
    pub fn insert_contact(&self, tenant: TenantId, contact: Contact) {
        self.lock()
            .contacts
            .insert((tenant, *contact.id.as_uuid()), contact);
    }

    /// Seed a location.
    pub fn insert_location(&self, tenant: TenantId, location: Location) {
        self.lock()
            .locations
            .insert((tenant, *location.id.as_uuid()), location);
    }

    /// Seed a campaign.
    pub fn insert_campaign(&self, tenant: TenantId, campaign: Campaign) {
        self.lock()
            .campaigns
            .insert((tenant, *campaign.id.as_uuid()), campaign);
    }

    /// Read back a contact.
    pub fn contact(&self, tenant: TenantId, id: ContactId) -> Option<Contact> {
        self.lock().contacts.get(&(tenant, *id.as_uuid())).cloned()
    }

    /// Read back a campaign.
    pub fn campaign(&self, tenant: TenantId, id: CampaignId) -> Option<Campaign> {
        self.lock().campaigns.get(&(tenant, *id.as_uuid())).cloned()
    }

    /// Snapshot of every message row.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Snapshot of the opt-out audit log.
    pub fn opt_out_log(&self) -> Vec<OptOutLogEntry> {
        self.lock()
            .opt_out_log
            .iter()
            .map(|(_, entry, _)| entry.clone())
            .collect()
    }

    /// Whether a phone is in the global opt-out table.
    pub fn globally_opted_out(&self, phone: &str) -> bool {
        self.lock().global_opt_outs.contains_key(phone)
    }
}

#[async_trait]
impl ContactRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: ContactId,
    ) -> Result<Option<Contact>, ContactRepositoryError> {
        Ok(self.lock().contacts.get(&(tenant, *id.as_uuid())).cloned())
    }

    async fn find_by_phone(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> Result<Option<Contact>, ContactRepositoryError> {
        Ok(self
            .lock()
            .contacts
            .iter()
            .find(|((owner, _), contact)| *owner == tenant && contact.phone == phone)
            .map(|(_, contact)| contact.clone()))
    }

    async fn record_opt_out(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
    ) -> Result<(), ContactRepositoryError> {
        let mut state = self.lock();
        if let Some(contact) = state.contacts.get_mut(&(tenant, *id.as_uuid())) {
            if !contact.sms_opted_out {
                contact.sms_opted_out = true;
                contact.sms_opted_out_at = Some(at);
            }
        }
        Ok(())
    }

    async fn record_opt_in(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
        method: ConsentMethod,
    ) -> Result<(), ContactRepositoryError> {
        let mut state = self.lock();
        if let Some(contact) = state.contacts.get_mut(&(tenant, *id.as_uuid())) {
            contact.sms_opted_out = false;
            contact.sms_opted_out_at = None;
            contact.sms_consent = true;
            contact.sms_consent_at = Some(at);
            contact.sms_consent_method = Some(method);
        }
        Ok(())
    }

    async fn find_campaign_recipients(
        &self,
        tenant: TenantId,
        kind: crate::domain::campaign::CampaignKind,
        targeting: &CampaignTargeting,
    ) -> Result<Vec<Contact>, ContactRepositoryError> {
        let state = self.lock();
        let recipients = state
            .contacts
            .iter()
            .filter(|((owner, _), _)| *owner == tenant)
            .map(|(_, contact)| contact)
            .filter(|contact| contact.age_verified)
            .filter(|contact| {
                !kind.touches_sms() || (contact.sms_consent && !contact.sms_opted_out)
            })
            .filter(|contact| !kind.touches_email() || contact.email_consent)
            .filter(|contact| {
                targeting.location_ids.is_empty()
                    || contact
                        .primary_location_id
                        .is_some_and(|id| targeting.location_ids.contains(&id))
            })
            .filter(|contact| {
                targeting.tags.is_empty()
                    || contact.tags.iter().any(|tag| targeting.tags.contains(tag))
            })
            .cloned()
            .collect();
        Ok(recipients)
    }
}

#[async_trait]
impl LocationRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: LocationId,
    ) -> Result<Option<Location>, LocationRepositoryError> {
        Ok(self.lock().locations.get(&(tenant, *id.as_uuid())).cloned())
    }

    async fn resolve_by_sms_number(
        &self,
        phone: &str,
    ) -> Result<Option<LocationHandle>, LocationRepositoryError> {
        Ok(self
            .lock()
            .locations
            .iter()
            .find(|(_, location)| location.sms_phone_number.as_deref() == Some(phone))
            .map(|((tenant, _), location)| LocationHandle {
                tenant_id: *tenant,
                location: location.clone(),
            }))
    }
}

#[async_trait]
impl CampaignRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>, CampaignRepositoryError> {
        Ok(self.lock().campaigns.get(&(tenant, *id.as_uuid())).cloned())
    }

    async fn mark_sending(
        &self,
        tenant: TenantId,
        id: CampaignId,
        total_recipients: u32,
        started_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&(tenant, *id.as_uuid())) {
            campaign.status = crate::domain::campaign::CampaignStatus::Sending;
            campaign.counters.total_recipients = total_recipients;
            campaign.started_at = Some(started_at);
        }
        Ok(())
    }

    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: CampaignId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&(tenant, *id.as_uuid())) {
            campaign.status = crate::domain::campaign::CampaignStatus::Sent;
            campaign.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn increment_counter(
        &self,
        tenant: TenantId,
        id: CampaignId,
        field: CounterField,
    ) -> Result<(), CampaignRepositoryError> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&(tenant, *id.as_uuid())) {
            let counter = match field {
                CounterField::Sent => &mut campaign.counters.sent,
                CounterField::Delivered => &mut campaign.counters.delivered,
                CounterField::Failed => &mut campaign.counters.failed,
                CounterField::OptedOut => &mut campaign.counters.opted_out,
            };
            *counter += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert_outbound(
        &self,
        tenant: TenantId,
        new: NewOutboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError> {
        let message = Message {
            id: MessageId::random(),
            tenant_id: tenant,
            contact_id: new.contact_id,
            campaign_id: new.campaign_id,
            kind: MessageKind::Sms,
            direction: MessageDirection::Outbound,
            to_address: new.to_address,
            from_address: new.from_address,
            content: new.content,
            segments: 1,
            provider_message_id: None,
            status: MessageStatus::Queued,
            provider_status: None,
            error_message: None,
            consent_verified_at: new.consent_verified_at,
            quiet_hours_checked_at: new.quiet_hours_checked_at,
            delivered_at: None,
            status_updated_at: at,
            created_at: at,
        };
        self.lock().messages.push(message.clone());
        Ok(message)
    }

    async fn insert_inbound(
        &self,
        tenant: TenantId,
        new: NewInboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError> {
        let message = Message {
            id: MessageId::random(),
            tenant_id: tenant,
            contact_id: new.contact_id,
            campaign_id: None,
            kind: MessageKind::Sms,
            direction: MessageDirection::Inbound,
            to_address: new.to_address,
            from_address: new.from_address,
            content: new.content,
            segments: 1,
            provider_message_id: new.provider_message_id,
            status: MessageStatus::Delivered,
            provider_status: None,
            error_message: None,
            consent_verified_at: None,
            quiet_hours_checked_at: None,
            delivered_at: Some(at),
            status_updated_at: at,
            created_at: at,
        };
        self.lock().messages.push(message.clone());
        Ok(message)
    }

    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: MessageId,
        provider_message_id: &str,
        segments: i32,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError> {
        let mut state = self.lock();
        if let Some(message) = state
            .messages
            .iter_mut()
            .find(|message| message.tenant_id == tenant && message.id == id)
        {
            message.status = MessageStatus::Sent;
            message.provider_message_id = Some(provider_message_id.to_string());
            message.segments = segments;
            message.status_updated_at = at;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        tenant: TenantId,
        id: MessageId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError> {
        let mut state = self.lock();
        if let Some(message) = state
            .messages
            .iter_mut()
            .find(|message| message.tenant_id == tenant && message.id == id)
        {
            message.status = MessageStatus::Failed;
            message.error_message = Some(error.to_string());
            message.status_updated_at = at;
        }
        Ok(())
    }

    async fn count_outbound_since(
        &self,
        tenant: TenantId,
        contact: ContactId,
        kind: MessageKind,
        since: DateTime<Utc>,
    ) -> Result<u64, MessageRepositoryError> {
        let count = self
            .lock()
            .messages
            .iter()
            .filter(|message| {
                message.tenant_id == tenant
                    && message.contact_id == Some(contact)
                    && message.kind == kind
                    && message.direction == MessageDirection::Outbound
                    && message.created_at >= since
            })
            .count();
        Ok(count as u64)
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MessageRepositoryError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .find(|message| message.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn apply_status(
        &self,
        tenant: TenantId,
        id: MessageId,
        update: StatusUpdate,
    ) -> Result<AppliedStatus, MessageRepositoryError> {
        let mut state = self.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|message| message.tenant_id == tenant && message.id == id)
            .ok_or_else(|| MessageRepositoryError::query(format!("message {id} not found")))?;

        if !message.status.can_transition_to(update.status) {
            return Ok(AppliedStatus {
                changed: false,
                message: message.clone(),
            });
        }

        let changed = message.status != update.status;
        if changed {
            message.status = update.status;
            message.status_updated_at = update.at;
            if let Some(delivered_at) = update.delivered_at {
                message.delivered_at = Some(delivered_at);
            }
        }
        message.provider_status = update.provider_status.clone();
        if update.error_message.is_some() {
            message.error_message = update.error_message.clone();
        }
        Ok(AppliedStatus {
            changed,
            message: message.clone(),
        })
    }
}

#[async_trait]
impl OptOutRepository for InMemoryStore {
    async fn append_log(
        &self,
        tenant: TenantId,
        entry: &OptOutLogEntry,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError> {
        self.lock().opt_out_log.push((tenant, entry.clone(), at));
        Ok(())
    }

    async fn is_globally_opted_out(
        &self,
        phone: &str,
    ) -> Result<bool, OptOutRepositoryError> {
        Ok(self.lock().global_opt_outs.contains_key(phone))
    }

    async fn record_global(
        &self,
        phone: &str,
        source_tenant: TenantId,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError> {
        self.lock()
            .global_opt_outs
            .entry(phone.to_string())
            .or_insert((source_tenant, at));
        Ok(())
    }

    async fn clear_global(&self, phone: &str) -> Result<(), OptOutRepositoryError> {
        self.lock().global_opt_outs.remove(phone);
        Ok(())
    }
}

/// Scriptable carrier adapter.
///
/// Pops pre-loaded results in order; once the script is exhausted every send
/// succeeds with a generated provider id.
#[derive(Default)]
pub struct ScriptedSmsProvider {
    script: Mutex<VecDeque<Result<ProviderReceipt, SmsProviderError>>>,
    sent: Mutex<Vec<(String, SenderIdentity, String)>>,
}

impl ScriptedSmsProvider {
    /// Create a provider that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next send result.
    pub fn push_result(&self, result: Result<ProviderReceipt, SmsProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    /// Every dispatched message in order: `(to, from, content)`.
    pub fn sent(&self) -> Vec<(String, SenderIdentity, String)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl SmsProvider for ScriptedSmsProvider {
    async fn send(
        &self,
        to: &str,
        from: &SenderIdentity,
        content: &str,
    ) -> Result<ProviderReceipt, SmsProviderError> {
        let result = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| {
                Ok(ProviderReceipt {
                    provider_message_id: format!("scripted-{}", Uuid::new_v4()),
                    segments: 1,
                })
            });
        if result.is_ok() {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((to.to_string(), from.clone(), content.to_string()));
            }
        }
        result
    }
}

/// A contact that passes every compliance check.
pub fn compliant_contact(phone: &str, consent_at: DateTime<Utc>) -> Contact {
    Contact {
        id: ContactId::random(),
        phone: phone.to_string(),
        primary_location_id: None,
        sms_consent: true,
        sms_consent_at: Some(consent_at),
        sms_consent_method: Some(ConsentMethod::Manual),
        email_consent: false,
        sms_opted_out: false,
        sms_opted_out_at: None,
        age_verified: true,
        date_of_birth: None,
        tags: Vec::new(),
        timezone: None,
    }
}
