//! Opt-out round trip across the whole core: inbound STOP through the
//! reconciler, the audit trail, the cross-tenant opt-out table, and the
//! compliance gate refusing later sends from any tenant.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use backend::domain::compliance::{ComplianceGate, CompliancePolicy};
use backend::domain::contact::Contact;
use backend::domain::location::{Location, LocationId};
use backend::domain::message::MessageDirection;
use backend::domain::opt_out::{KeywordSets, OptOutAction};
use backend::domain::ports::{NoStateRules, RecordingDeliveryQueue};
use backend::domain::reconciler::{InboundAction, InboundReconciler};
use backend::domain::send_service::{SendDecision, SendService, SendSmsRequest};
use backend::domain::tenant::TenantId;
use backend::test_support::{compliant_contact, InMemoryStore, MutableClock, ScriptedSmsProvider};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 19, 0, 0).single().expect("valid instant")
}

struct Core {
    store: Arc<InMemoryStore>,
    queue: Arc<RecordingDeliveryQueue>,
    tenant: TenantId,
    send: Arc<SendService>,
    reconciler: InboundReconciler,
}

fn core() -> Core {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(RecordingDeliveryQueue::new());
    let provider = Arc::new(ScriptedSmsProvider::new());
    let clock = Arc::new(MutableClock::new(noon()));

    let gate = Arc::new(ComplianceGate::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NoStateRules),
        clock.clone(),
        CompliancePolicy::default(),
    ));
    let send = Arc::new(SendService::new(gate, queue.clone(), clock.clone()));
    let reconciler = InboundReconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        provider,
        clock,
        KeywordSets::default(),
    );

    Core {
        store,
        queue,
        tenant: TenantId::random(),
        send,
        reconciler,
    }
}

fn seed(core: &Core) -> (Location, Contact) {
    let location = Location {
        id: LocationId::random(),
        name: "Harbor Blvd".to_string(),
        us_state: "CA".to_string(),
        timezone: "America/Los_Angeles".to_string(),
        sms_phone_number: Some("+14155550100".to_string()),
    };
    core.store.insert_location(core.tenant, location.clone());
    let contact = compliant_contact("+14155551212", noon());
    core.store.insert_contact(core.tenant, contact.clone());
    (location, contact)
}

// S4 end to end: one STOP produces the flag, the audit row, the global
// entry, and the confirmation message.
#[tokio::test]
async fn stop_reply_flags_logs_globalizes_and_confirms() {
    let core = core();
    let (_, contact) = seed(&core);

    let action = core
        .reconciler
        .on_inbound("+1 (415) 555-1212", "+14155550100", " Stop ", "in-1")
        .await
        .expect("inbound resolves");

    assert_eq!(action, InboundAction::OptedOut);

    let updated = core
        .store
        .contact(core.tenant, contact.id)
        .expect("contact exists");
    assert!(updated.sms_opted_out);

    let log = core.store.opt_out_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, OptOutAction::OptOut);

    assert!(core.store.globally_opted_out("+14155551212"));

    let confirmations: Vec<_> = core
        .store
        .messages()
        .into_iter()
        .filter(|message| {
            message.direction == MessageDirection::Outbound
                && message.content.contains("unsubscribed")
        })
        .collect();
    assert_eq!(confirmations.len(), 1);
}

// Property 5: once a phone is in the global table, no tenant may message it.
#[tokio::test]
async fn global_opt_out_blocks_every_tenant() {
    let core = core();
    let (_, _contact) = seed(&core);

    core.reconciler
        .on_inbound("+14155551212", "+14155550100", "STOP", "in-1")
        .await
        .expect("inbound resolves");

    // A different tenant holds the same phone number with full consent.
    let other_tenant = TenantId::random();
    let other_contact = compliant_contact("+14155551212", noon());
    core.store.insert_contact(other_tenant, other_contact.clone());

    let decision = core
        .send
        .send_sms(
            other_tenant,
            SendSmsRequest {
                contact_id: other_contact.id,
                location_id: None,
                content: "cross-tenant promo".to_string(),
                campaign_id: None,
            },
        )
        .await
        .expect("send resolves");

    match decision {
        SendDecision::Blocked { reasons } => {
            assert!(reasons
                .iter()
                .any(|reason| reason.contains("global opt-out")));
        }
        other => panic!("expected global opt-out block, got {other:?}"),
    }
    assert!(core.queue.recorded().is_empty());
}

// START after STOP restores sendability end to end.
#[tokio::test]
async fn start_reply_reopens_the_send_path() {
    let core = core();
    let (_, contact) = seed(&core);

    core.reconciler
        .on_inbound("+14155551212", "+14155550100", "STOP", "in-1")
        .await
        .expect("stop resolves");
    core.reconciler
        .on_inbound("+14155551212", "+14155550100", "START", "in-2")
        .await
        .expect("start resolves");

    assert!(!core.store.globally_opted_out("+14155551212"));

    let decision = core
        .send
        .send_sms(
            core.tenant,
            SendSmsRequest {
                contact_id: contact.id,
                location_id: None,
                content: "welcome back".to_string(),
                campaign_id: None,
            },
        )
        .await
        .expect("send resolves");

    assert!(matches!(decision, SendDecision::Queued { .. }));
    assert_eq!(core.queue.recorded().len(), 1);

    // Two audit rows: one opt-out, one opt-in.
    let log = core.store.opt_out_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].action, OptOutAction::OptOut);
    assert_eq!(log[1].action, OptOutAction::OptIn);
}

// Property 7: replaying the same inbound webhook leaves the same end state.
#[tokio::test]
async fn replayed_stop_webhooks_converge_to_one_state() {
    let core = core();
    let (_, contact) = seed(&core);

    for replay in 0..3 {
        let action = core
            .reconciler
            .on_inbound("+14155551212", "+14155550100", "STOP", "in-1")
            .await
            .expect("inbound resolves");
        assert_eq!(action, InboundAction::OptedOut, "replay {replay}");
    }

    let updated = core
        .store
        .contact(core.tenant, contact.id)
        .expect("contact exists");
    assert!(updated.sms_opted_out);
    assert!(core.store.globally_opted_out("+14155551212"));
    // The audit log intentionally grows per replay; the flag and the global
    // entry do not multiply.
    assert_eq!(core.store.opt_out_log().len(), 3);
}
