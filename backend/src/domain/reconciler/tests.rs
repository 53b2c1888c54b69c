//! Behaviour coverage for webhook reconciliation.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rstest::rstest;

use super::*;
use crate::domain::campaign::{
    Campaign, CampaignCounters, CampaignId, CampaignKind, CampaignStatus, CampaignTargeting,
};
use crate::domain::location::{Location, LocationId};
use crate::domain::message::MessageDirection;
use crate::domain::ports::NewOutboundSms;
use crate::test_support::{compliant_contact, InMemoryStore, MutableClock, ScriptedSmsProvider};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 19, 0, 0).single().expect("valid instant")
}

struct Harness {
    store: Arc<InMemoryStore>,
    provider: Arc<ScriptedSmsProvider>,
    tenant: TenantId,
    reconciler: InboundReconciler,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedSmsProvider::new());
    let clock = Arc::new(MutableClock::new(noon()));
    let reconciler = InboundReconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        provider.clone(),
        clock,
        KeywordSets::default(),
    );
    Harness {
        store,
        provider,
        tenant: TenantId::random(),
        reconciler,
    }
}

fn seed_location(harness: &Harness, number: &str) -> Location {
    let location = Location {
        id: LocationId::random(),
        name: "Valencia St".to_string(),
        us_state: "CA".to_string(),
        timezone: "America/Los_Angeles".to_string(),
        sms_phone_number: Some(number.to_string()),
    };
    harness.store.insert_location(harness.tenant, location.clone());
    location
}

async fn seed_sent_message(
    harness: &Harness,
    provider_id: &str,
    campaign_id: Option<CampaignId>,
) -> MessageId {
    let row = harness
        .store
        .insert_outbound(
            harness.tenant,
            NewOutboundSms {
                contact_id: None,
                campaign_id,
                to_address: "+14155551212".to_string(),
                from_address: "+14155550100".to_string(),
                content: "hello".to_string(),
                consent_verified_at: Some(noon()),
                quiet_hours_checked_at: Some(noon()),
            },
            noon(),
        )
        .await
        .expect("seed message");
    crate::domain::ports::MessageRepository::mark_sent(
        harness.store.as_ref(),
        harness.tenant,
        row.id,
        provider_id,
        1,
        noon(),
    )
    .await
    .expect("mark sent");
    row.id
}

#[rstest]
#[case("queued", Some(MessageStatus::Queued))]
#[case("sending", Some(MessageStatus::Sending))]
#[case("sent", Some(MessageStatus::Sent))]
#[case("delivered", Some(MessageStatus::Delivered))]
#[case("delivery_failed", Some(MessageStatus::Failed))]
#[case("delivery_unconfirmed", Some(MessageStatus::Sent))]
#[case("webhook_burp", None)]
fn provider_statuses_translate(#[case] raw: &str, #[case] expected: Option<MessageStatus>) {
    assert_eq!(translate_provider_status(raw), expected);
}

#[tokio::test]
async fn delivered_receipt_updates_row_and_captures_timestamp() {
    let harness = harness();
    seed_sent_message(&harness, "prov-1", None).await;

    let outcome = harness
        .reconciler
        .on_status("prov-1", "delivered", None)
        .await
        .expect("status processing succeeds");

    assert_eq!(outcome, StatusOutcome::Updated(MessageStatus::Delivered));
    let row = harness
        .store
        .find_by_provider_id("prov-1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.status, MessageStatus::Delivered);
    assert_eq!(row.provider_status.as_deref(), Some("delivered"));
    assert!(row.delivered_at.is_some());
}

#[tokio::test]
async fn late_sent_receipt_cannot_regress_delivered() {
    let harness = harness();
    seed_sent_message(&harness, "prov-1", None).await;

    harness
        .reconciler
        .on_status("prov-1", "delivered", None)
        .await
        .expect("delivered first");
    let outcome = harness
        .reconciler
        .on_status("prov-1", "sent", None)
        .await
        .expect("late sent receipt");

    assert_eq!(outcome, StatusOutcome::Unchanged(MessageStatus::Delivered));
    let row = harness
        .store
        .find_by_provider_id("prov-1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn replaying_a_receipt_yields_the_same_row_and_one_counter_bump() {
    let harness = harness();
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
    seed_sent_message(&harness, "prov-1", Some(campaign_id)).await;

    for _ in 0..3 {
        harness
            .reconciler
            .on_status("prov-1", "delivered", None)
            .await
            .expect("status processing succeeds");
    }

    let campaign = harness
        .store
        .campaign(harness.tenant, campaign_id)
        .expect("campaign exists");
    assert_eq!(campaign.counters.delivered, 1);
    let row = harness
        .store
        .find_by_provider_id("prov-1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn first_sent_receipt_counts_without_changing_the_row() {
    let harness = harness();
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
    // The worker already stamped the row `sent` at dispatch time.
    seed_sent_message(&harness, "prov-7", Some(campaign_id)).await;

    let outcome = harness
        .reconciler
        .on_status("prov-7", "sent", None)
        .await
        .expect("status processing succeeds");

    // First carrier report: the counter advances even though the row holds
    // its status.
    assert_eq!(outcome, StatusOutcome::Unchanged(MessageStatus::Sent));
    let campaign = harness
        .store
        .campaign(harness.tenant, campaign_id)
        .expect("campaign exists");
    assert_eq!(campaign.counters.sent, 1);

    harness
        .reconciler
        .on_status("prov-7", "sent", None)
        .await
        .expect("replayed receipt");
    let campaign = harness
        .store
        .campaign(harness.tenant, campaign_id)
        .expect("campaign exists");
    assert_eq!(campaign.counters.sent, 1, "replay must not inflate the counter");
}

#[tokio::test]
async fn failed_receipt_records_error_and_increments_failed_counter() {
    let harness = harness();
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
    seed_sent_message(&harness, "prov-9", Some(campaign_id)).await;

    let outcome = harness
        .reconciler
        .on_status(
            "prov-9",
            "delivery_failed",
            Some("carrier rejected: spam".to_string()),
        )
        .await
        .expect("status processing succeeds");

    assert_eq!(outcome, StatusOutcome::Updated(MessageStatus::Failed));
    let row = harness
        .store
        .find_by_provider_id("prov-9")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.error_message.as_deref(), Some("carrier rejected: spam"));
    let campaign = harness
        .store
        .campaign(harness.tenant, campaign_id)
        .expect("campaign exists");
    assert_eq!(campaign.counters.failed, 1);
}

#[tokio::test]
async fn unknown_provider_status_records_text_without_moving_status() {
    let harness = harness();
    seed_sent_message(&harness, "prov-1", None).await;

    let outcome = harness
        .reconciler
        .on_status("prov-1", "carrier_gibberish", None)
        .await
        .expect("status processing succeeds");

    assert_eq!(outcome, StatusOutcome::Untranslated);
    let row = harness
        .store
        .find_by_provider_id("prov-1")
        .await
        .expect("lookup")
        .expect("row exists");
    assert_eq!(row.status, MessageStatus::Sent);
    assert_eq!(row.provider_status.as_deref(), Some("carrier_gibberish"));
}

#[tokio::test]
async fn receipt_for_unknown_provider_id_is_ignored() {
    let harness = harness();

    let outcome = harness
        .reconciler
        .on_status("never-seen", "delivered", None)
        .await
        .expect("status processing succeeds");

    assert_eq!(outcome, StatusOutcome::UnknownMessage);
}

#[tokio::test]
async fn stop_keyword_runs_the_full_opt_out_round_trip() {
    let harness = harness();
    seed_location(&harness, "+14155550100");
    let contact = compliant_contact("+14155551212", noon());
    harness.store.insert_contact(harness.tenant, contact.clone());

    let action = harness
        .reconciler
        .on_inbound("+14155551212", "+14155550100", "stop", "in-1")
        .await
        .expect("inbound processing succeeds");

    assert_eq!(action, InboundAction::OptedOut);

    let updated = harness
        .store
        .contact(harness.tenant, contact.id)
        .expect("contact exists");
    assert!(updated.sms_opted_out);
    assert!(updated.sms_opted_out_at.is_some());

    let log = harness.store.opt_out_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, OptOutAction::OptOut);
    assert_eq!(log[0].method, ConsentMethod::KeywordReply);
    assert_eq!(log[0].address, "+14155551212");

    assert!(harness.store.globally_opted_out("+14155551212"));

    let messages = harness.store.messages();
    let confirmation = messages
        .iter()
        .find(|message| {
            message.direction == MessageDirection::Outbound
                && message.content.contains("unsubscribed")
        })
        .expect("confirmation row exists");
    assert_eq!(confirmation.to_address, "+14155551212");
    assert_eq!(confirmation.from_address, "+14155550100");
    assert!(confirmation.consent_verified_at.is_none());
    assert_eq!(harness.provider.sent().len(), 1);
}

#[tokio::test]
async fn repeated_stop_is_idempotent_except_for_the_audit_log() {
    let harness = harness();
    seed_location(&harness, "+14155550100");
    let contact = compliant_contact("+14155551212", noon());
    harness.store.insert_contact(harness.tenant, contact.clone());

    harness
        .reconciler
        .on_inbound("+14155551212", "+14155550100", "STOP", "in-1")
        .await
        .expect("first stop");
    let first_opt_out_at = harness
        .store
        .contact(harness.tenant, contact.id)
        .expect("contact exists")
        .sms_opted_out_at;

    harness
        .reconciler
        .on_inbound("+14155551212", "+14155550100", "STOP", "in-2")
        .await
        .expect("second stop");

    let updated = harness
        .store
        .contact(harness.tenant, contact.id)
        .expect("contact exists");
    assert!(updated.sms_opted_out);
    assert_eq!(updated.sms_opted_out_at, first_opt_out_at);
    // One additional audit row per repeat is intentional.
    assert_eq!(harness.store.opt_out_log().len(), 2);
    assert!(harness.store.globally_opted_out("+14155551212"));
}

#[tokio::test]
async fn start_keyword_restores_consent_and_clears_global_opt_out() {
    let harness = harness();
    seed_location(&harness, "+14155550100");
    let mut contact = compliant_contact("+14155551212", noon());
    contact.sms_opted_out = true;
    contact.sms_opted_out_at = Some(noon());
    contact.sms_consent = false;
    harness.store.insert_contact(harness.tenant, contact.clone());
    harness
        .store
        .record_global("+14155551212", harness.tenant, noon())
        .await
        .expect("seed global opt-out");

    let action = harness
        .reconciler
        .on_inbound("+14155551212", "+14155550100", "start", "in-1")
        .await
        .expect("inbound processing succeeds");

    assert_eq!(action, InboundAction::OptedIn);
    let updated = harness
        .store
        .contact(harness.tenant, contact.id)
        .expect("contact exists");
    assert!(!updated.sms_opted_out);
    assert!(updated.sms_consent);
    assert_eq!(updated.sms_consent_method, Some(ConsentMethod::KeywordReply));
    assert!(!harness.store.globally_opted_out("+14155551212"));

    let log = harness.store.opt_out_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, OptOutAction::OptIn);
}

#[tokio::test]
async fn unknown_destination_number_drops_the_message() {
    let harness = harness();

    let action = harness
        .reconciler
        .on_inbound("+14155551212", "+19995550000", "stop", "in-1")
        .await
        .expect("inbound processing succeeds");

    assert_eq!(action, InboundAction::UnknownDestination);
    assert!(harness.store.messages().is_empty());
    assert!(harness.store.opt_out_log().is_empty());
    assert!(!harness.store.globally_opted_out("+14155551212"));
}

#[tokio::test]
async fn plain_text_records_an_inbound_row_only() {
    let harness = harness();
    seed_location(&harness, "+14155550100");
    let contact = compliant_contact("+14155551212", noon());
    harness.store.insert_contact(harness.tenant, contact.clone());

    let action = harness
        .reconciler
        .on_inbound("+14155551212", "+14155550100", "do you open at noon?", "in-1")
        .await
        .expect("inbound processing succeeds");

    assert_eq!(action, InboundAction::Received);
    let messages = harness.store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, MessageDirection::Inbound);
    assert_eq!(messages[0].status, MessageStatus::Delivered);
    assert_eq!(messages[0].contact_id, Some(contact.id));
    assert!(harness.provider.sent().is_empty());
}

#[tokio::test]
async fn stop_from_unknown_number_still_lands_in_the_global_table() {
    let harness = harness();
    seed_location(&harness, "+14155550100");

    let action = harness
        .reconciler
        .on_inbound("+14155559999", "+14155550100", "stop", "in-1")
        .await
        .expect("inbound processing succeeds");

    assert_eq!(action, InboundAction::OptedOut);
    assert!(harness.store.globally_opted_out("+14155559999"));
    let log = harness.store.opt_out_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].contact_id, None);
}
