//! Wire types for the carrier's create-message operation.

use serde::{Deserialize, Serialize};

/// Request body for `POST /v2/messages`.
///
/// Exactly one of `from` and `messaging_profile_id` is set, matching the two
/// sending identities.
#[derive(Debug, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub to: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messaging_profile_id: Option<&'a str>,
}

/// Response envelope for an accepted message.
#[derive(Debug, Deserialize)]
pub struct CreateMessageResponse {
    pub data: CreateMessageData,
}

/// Accepted-message payload.
#[derive(Debug, Deserialize)]
pub struct CreateMessageData {
    /// Carrier-assigned message id.
    pub id: String,
    /// Billable segment count; absent for some legacy numbers.
    pub parts: Option<i32>,
}
