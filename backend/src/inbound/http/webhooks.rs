//! Carrier webhook handler.
//!
//! ```text
//! POST /webhooks/telnyx
//! ```
//!
//! The signature is verified over the raw body, then the handler acks 200
//! immediately and hands the event to the reconciler on a spawned task:
//! carrier retry timers are measured in hundreds of milliseconds and must
//! never wait on database work.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::domain::reconciler::InboundReconciler;

use super::state::HttpState;

const TIMESTAMP_HEADER: &str = "telnyx-timestamp";
const SIGNATURE_HEADER: &str = "telnyx-signature-ed25519";

/// Outer webhook envelope.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    data: WebhookEvent,
}

/// One carrier event; the payload shape depends on `event_type`.
#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_type: String,
    #[serde(default)]
    payload: Value,
}

fn header<'r>(request: &'r HttpRequest, name: &str) -> Option<&'r str> {
    request.headers().get(name).and_then(|value| value.to_str().ok())
}

/// Receive a carrier webhook.
#[post("/webhooks/telnyx")]
pub async fn telnyx_webhook(
    state: web::Data<HttpState>,
    request: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let (Some(timestamp), Some(signature)) = (
        header(&request, TIMESTAMP_HEADER),
        header(&request, SIGNATURE_HEADER),
    ) else {
        warn!("webhook missing signature headers");
        return HttpResponse::Unauthorized().json(json!({ "received": false }));
    };

    if let Err(error) = state.webhook_verifier.verify(timestamp, signature, &body) {
        warn!(error = %error, "webhook signature rejected");
        return HttpResponse::Unauthorized().json(json!({ "received": false }));
    }

    // Acknowledge before any downstream work; processing latency must not
    // trigger carrier retries. Everything after this point happens off the
    // request path.
    match serde_json::from_slice::<WebhookEnvelope>(&body) {
        Ok(envelope) => {
            let reconciler = state.reconciler.clone();
            actix_web::rt::spawn(async move {
                process_event(reconciler, envelope).await;
            });
        }
        Err(error) => {
            warn!(error = %error, "unparseable webhook body acknowledged and dropped");
        }
    }

    HttpResponse::Ok().json(json!({ "received": true }))
}

/// Fallback internal status when the payload omits `to[0].status`.
fn fallback_status(event_type: &str) -> Option<&'static str> {
    match event_type {
        "message.sent" => Some("sent"),
        "message.delivered" => Some("delivered"),
        "message.failed" | "message.delivery_failed" => Some("delivery_failed"),
        _ => None,
    }
}

/// Join the carrier's structured error fields into one stored string.
fn extract_error(payload: &Value) -> Option<String> {
    let first = payload.get("errors")?.get(0)?;
    let code = first.get("code").and_then(Value::as_str).unwrap_or_default();
    let title = first.get("title").and_then(Value::as_str).unwrap_or_default();
    let detail = first.get("detail").and_then(Value::as_str).unwrap_or_default();
    let joined = [code, title, detail]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(": ");
    (!joined.is_empty()).then_some(joined)
}

async fn process_event(reconciler: std::sync::Arc<InboundReconciler>, envelope: WebhookEnvelope) {
    let event_type = envelope.data.event_type.as_str();
    let payload = &envelope.data.payload;

    match event_type {
        "message.received" => {
            let from = payload
                .pointer("/from/phone_number")
                .and_then(Value::as_str);
            let to = payload
                .pointer("/to/0/phone_number")
                .and_then(Value::as_str);
            let text = payload.get("text").and_then(Value::as_str).unwrap_or("");
            let id = payload.get("id").and_then(Value::as_str).unwrap_or("");
            let (Some(from), Some(to)) = (from, to) else {
                warn!(event_type, "inbound event missing addresses");
                return;
            };
            if let Err(error) = reconciler.on_inbound(from, to, text, id).await {
                warn!(error = %error, "inbound webhook processing failed");
            }
        }
        "message.sent"
        | "message.finalized"
        | "message.delivered"
        | "message.failed"
        | "message.delivery_failed" => {
            let Some(id) = payload.get("id").and_then(Value::as_str) else {
                warn!(event_type, "status event missing message id");
                return;
            };
            let status = payload
                .pointer("/to/0/status")
                .and_then(Value::as_str)
                .or_else(|| fallback_status(event_type));
            let Some(status) = status else {
                warn!(event_type, "status event carries no status");
                return;
            };
            let error = extract_error(payload);
            if let Err(error) = reconciler.on_status(id, status, error).await {
                warn!(error = %error, "status webhook processing failed");
            }
        }
        other => {
            info!(event_type = other, "unhandled webhook event type");
        }
    }
}

#[cfg(test)]
#[path = "webhooks_tests.rs"]
mod tests;
