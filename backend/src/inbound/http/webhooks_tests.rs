//! Tests for the carrier webhook handler and its mapping helpers.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test as actix_test, web, App};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rstest::rstest;
use serde_json::Value;

use super::*;
use crate::domain::compliance::{ComplianceGate, CompliancePolicy};
use crate::domain::contact::Contact;
use crate::domain::location::{Location, LocationId};
use crate::domain::message::MessageStatus;
use crate::domain::opt_out::KeywordSets;
use crate::domain::ports::{
    MessageRepository, NewOutboundSms, NoStateRules, RecordingDeliveryQueue,
};
use crate::domain::send_service::SendService;
use crate::domain::tenant::TenantId;
use crate::inbound::http::signature::WebhookVerifier;
use crate::test_support::{compliant_contact, InMemoryStore, MutableClock, ScriptedSmsProvider};

/// Unix instant both the clock and the signed timestamps use.
const SIGNED_AT: i64 = 1_751_000_000;

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn sign(timestamp: &str, body: &[u8]) -> String {
    let mut payload = Vec::new();
    payload.extend_from_slice(timestamp.as_bytes());
    payload.push(b'|');
    payload.extend_from_slice(body);
    BASE64.encode(signing_key().sign(&payload).to_bytes())
}

struct Harness {
    store: Arc<InMemoryStore>,
    tenant: TenantId,
    state: web::Data<HttpState>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedSmsProvider::new());
    let clock = Arc::new(MutableClock::new(
        Utc.timestamp_opt(SIGNED_AT, 0).single().expect("valid instant"),
    ));

    let gate = Arc::new(ComplianceGate::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NoStateRules),
        clock.clone(),
        CompliancePolicy::default(),
    ));
    let send = Arc::new(SendService::new(
        gate,
        Arc::new(RecordingDeliveryQueue::new()),
        clock.clone(),
    ));
    let reconciler = Arc::new(InboundReconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        provider,
        clock.clone(),
        KeywordSets::default(),
    ));
    let public_key = BASE64.encode(signing_key().verifying_key().as_bytes());
    let verifier = Arc::new(WebhookVerifier::new(&public_key, clock).expect("verifier builds"));

    Harness {
        store,
        tenant: TenantId::random(),
        state: web::Data::new(HttpState::new(send, reconciler, verifier)),
    }
}

fn seed_contact_and_location(harness: &Harness) -> Contact {
    harness.store.insert_location(
        harness.tenant,
        Location {
            id: LocationId::random(),
            name: "Valencia St".to_string(),
            us_state: "CA".to_string(),
            timezone: "America/Los_Angeles".to_string(),
            sms_phone_number: Some("+14155550100".to_string()),
        },
    );
    let contact = compliant_contact(
        "+14155551212",
        Utc.timestamp_opt(SIGNED_AT, 0).single().expect("valid instant"),
    );
    harness.store.insert_contact(harness.tenant, contact.clone());
    contact
}

async fn post_webhook(
    harness: &Harness,
    body: &str,
    timestamp: &str,
    signature: &str,
) -> actix_web::dev::ServiceResponse {
    let app = actix_test::init_service(
        App::new()
            .app_data(harness.state.clone())
            .service(telnyx_webhook),
    )
    .await;
    let request = actix_test::TestRequest::post()
        .uri("/webhooks/telnyx")
        .insert_header((TIMESTAMP_HEADER, timestamp))
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("content-type", "application/json"))
        .set_payload(body.to_string())
        .to_request();
    actix_test::call_service(&app, request).await
}

/// Processing happens on a spawned task after the ack; poll until it lands.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("webhook processing did not converge in time");
}

fn inbound_stop_body() -> String {
    serde_json::json!({
        "data": {
            "event_type": "message.received",
            "payload": {
                "id": "in-1",
                "from": { "phone_number": "+14155551212" },
                "to": [{ "phone_number": "+14155550100" }],
                "text": "STOP"
            }
        }
    })
    .to_string()
}

#[actix_web::test]
async fn valid_stop_webhook_acks_then_processes() {
    let harness = harness();
    let contact = seed_contact_and_location(&harness);

    let body = inbound_stop_body();
    let timestamp = SIGNED_AT.to_string();
    let signature = sign(&timestamp, body.as_bytes());
    let response = post_webhook(&harness, &body, &timestamp, &signature).await;

    // The ack arrives before any store work happens.
    assert_eq!(response.status(), StatusCode::OK);
    let ack: Value = actix_test::read_body_json(response).await;
    assert_eq!(ack.get("received"), Some(&Value::Bool(true)));

    let store = harness.store.clone();
    let tenant = harness.tenant;
    wait_until(move || {
        store
            .contact(tenant, contact.id)
            .is_some_and(|contact| contact.sms_opted_out)
    })
    .await;
    assert!(harness.store.globally_opted_out("+14155551212"));
    assert_eq!(harness.store.opt_out_log().len(), 1);
}

#[actix_web::test]
async fn status_webhook_advances_the_message_row() {
    let harness = harness();
    seed_contact_and_location(&harness);
    let row = harness
        .store
        .insert_outbound(
            harness.tenant,
            NewOutboundSms {
                contact_id: None,
                campaign_id: None,
                to_address: "+14155551212".to_string(),
                from_address: "+14155550100".to_string(),
                content: "hello".to_string(),
                consent_verified_at: None,
                quiet_hours_checked_at: None,
            },
            Utc.timestamp_opt(SIGNED_AT, 0).single().expect("valid instant"),
        )
        .await
        .expect("seed row");
    harness
        .store
        .mark_sent(
            harness.tenant,
            row.id,
            "prov-1",
            1,
            Utc.timestamp_opt(SIGNED_AT, 0).single().expect("valid instant"),
        )
        .await
        .expect("mark sent");

    let body = serde_json::json!({
        "data": {
            "event_type": "message.finalized",
            "payload": {
                "id": "prov-1",
                "to": [{ "status": "delivered" }]
            }
        }
    })
    .to_string();
    let timestamp = SIGNED_AT.to_string();
    let signature = sign(&timestamp, body.as_bytes());
    let response = post_webhook(&harness, &body, &timestamp, &signature).await;

    assert_eq!(response.status(), StatusCode::OK);
    let store = harness.store.clone();
    wait_until(move || {
        store
            .messages()
            .iter()
            .any(|message| message.status == MessageStatus::Delivered)
    })
    .await;
}

#[actix_web::test]
async fn tampered_signature_is_rejected_and_nothing_persists() {
    let harness = harness();
    let contact = seed_contact_and_location(&harness);

    let body = inbound_stop_body();
    let timestamp = SIGNED_AT.to_string();
    let signature = sign(&timestamp, b"some other body");
    let response = post_webhook(&harness, &body, &timestamp, &signature).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(harness.store.messages().is_empty());
    assert!(!harness
        .store
        .contact(harness.tenant, contact.id)
        .expect("contact exists")
        .sms_opted_out);
}

#[actix_web::test]
async fn missing_signature_headers_are_rejected() {
    let harness = harness();
    seed_contact_and_location(&harness);

    let app = actix_test::init_service(
        App::new()
            .app_data(harness.state.clone())
            .service(telnyx_webhook),
    )
    .await;
    let request = actix_test::TestRequest::post()
        .uri("/webhooks/telnyx")
        .insert_header(("content-type", "application/json"))
        .set_payload(inbound_stop_body())
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unparseable_but_signed_body_is_acknowledged_and_dropped() {
    let harness = harness();
    seed_contact_and_location(&harness);

    let body = "{\"data\": \"not an envelope\"}";
    let timestamp = SIGNED_AT.to_string();
    let signature = sign(&timestamp, body.as_bytes());
    let response = post_webhook(&harness, body, &timestamp, &signature).await;

    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(harness.store.messages().is_empty());
}

#[rstest]
#[case("message.sent", Some("sent"))]
#[case("message.delivered", Some("delivered"))]
#[case("message.failed", Some("delivery_failed"))]
#[case("message.delivery_failed", Some("delivery_failed"))]
#[case("message.finalized", None)]
fn fallback_statuses_follow_event_types(
    #[case] event_type: &str,
    #[case] expected: Option<&str>,
) {
    assert_eq!(fallback_status(event_type), expected);
}

#[rstest]
fn error_fields_join_in_order() {
    let payload = json!({
        "errors": [{ "code": "40300", "title": "Blocked", "detail": "Spam filter" }]
    });
    assert_eq!(
        extract_error(&payload).as_deref(),
        Some("40300: Blocked: Spam filter")
    );
}

#[rstest]
fn missing_error_fields_yield_none() {
    assert_eq!(extract_error(&json!({})), None);
    assert_eq!(extract_error(&json!({ "errors": [] })), None);
}

#[rstest]
fn envelope_decodes_the_documented_shape() {
    let envelope: WebhookEnvelope = serde_json::from_str(
        r#"{
            "data": {
                "event_type": "message.received",
                "payload": {
                    "id": "in-1",
                    "from": { "phone_number": "+14155551212" },
                    "to": [{ "phone_number": "+14155550100" }],
                    "text": "STOP"
                }
            }
        }"#,
    )
    .expect("decode");
    assert_eq!(envelope.data.event_type, "message.received");
    assert_eq!(
        envelope.data.payload.pointer("/from/phone_number"),
        Some(&json!("+14155551212"))
    );
}
