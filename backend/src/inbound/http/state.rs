//! Shared HTTP adapter state.
//!
//! Handlers accept this state via `actix_web::web::Data` so they depend only
//! on domain services and remain testable without I/O.

use std::sync::Arc;

use crate::domain::reconciler::InboundReconciler;
use crate::domain::send_service::SendService;

use super::signature::WebhookVerifier;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub send: Arc<SendService>,
    pub reconciler: Arc<InboundReconciler>,
    pub webhook_verifier: Arc<WebhookVerifier>,
}

impl HttpState {
    /// Construct state from explicit service implementations.
    pub fn new(
        send: Arc<SendService>,
        reconciler: Arc<InboundReconciler>,
        webhook_verifier: Arc<WebhookVerifier>,
    ) -> Self {
        Self {
            send,
            reconciler,
            webhook_verifier,
        }
    }
}
