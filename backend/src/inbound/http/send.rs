//! Single-send and campaign-send HTTP handlers.
//!
//! ```text
//! POST /api/sms/send
//! POST /api/campaigns/{id}/send
//! ```
//!
//! Both require the `X-Tenant-Id` header; a compliance block surfaces as a
//! structured 422, not an error.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::campaign::CampaignId;
use crate::domain::contact::ContactId;
use crate::domain::location::LocationId;
use crate::domain::send_service::{SendDecision, SendSmsRequest};
use crate::domain::tenant::TenantId;
use crate::domain::Error;

use super::state::HttpState;
use super::ApiResult;

/// Name of the tenant header every API call carries.
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Extract and parse the tenant header.
pub fn require_tenant(request: &HttpRequest) -> Result<TenantId, Error> {
    let value = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::unauthorized("missing X-Tenant-Id header"))?;
    value
        .parse::<Uuid>()
        .map(TenantId::from_uuid)
        .map_err(|_| Error::unauthorized("invalid X-Tenant-Id header"))
}

/// Request payload for a single SMS send.
#[derive(Debug, Deserialize)]
pub struct SendSmsBody {
    pub contact_id: Uuid,
    pub location_id: Option<Uuid>,
    pub content: String,
}

/// Submit one SMS for compliance-gated delivery.
#[post("/api/sms/send")]
pub async fn send_sms(
    state: web::Data<HttpState>,
    request: HttpRequest,
    body: web::Json<SendSmsBody>,
) -> ApiResult<HttpResponse> {
    let tenant = require_tenant(&request)?;
    let body = body.into_inner();
    if body.content.trim().is_empty() {
        return Err(Error::invalid_request("content must not be empty"));
    }

    let decision = state
        .send
        .send_sms(
            tenant,
            SendSmsRequest {
                contact_id: ContactId::from_uuid(body.contact_id),
                location_id: body.location_id.map(LocationId::from_uuid),
                content: body.content,
                campaign_id: None,
            },
        )
        .await?;

    Ok(match decision {
        SendDecision::Queued {
            job_id,
            deferred_until,
        } => HttpResponse::Ok().json(json!({
            "success": true,
            "jobId": job_id.to_string(),
            "deferredUntil": deferred_until.map(|at| at.to_rfc3339()),
        })),
        SendDecision::Blocked { reasons } => HttpResponse::UnprocessableEntity().json(json!({
            "success": false,
            "blocked": true,
            "reasons": reasons,
        })),
    })
}

/// Trigger expansion of a campaign into per-recipient sends.
#[post("/api/campaigns/{id}/send")]
pub async fn send_campaign(
    state: web::Data<HttpState>,
    request: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let tenant = require_tenant(&request)?;
    let campaign_id = CampaignId::from_uuid(path.into_inner());

    let job_id = state.send.send_campaign(tenant, campaign_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "jobId": job_id.to_string(),
    })))
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
