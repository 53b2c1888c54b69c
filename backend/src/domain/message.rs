//! Message entity: one audit row per send or receipt.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::campaign::CampaignId;
use crate::domain::contact::ContactId;
use crate::domain::tenant::TenantId;

/// Identifier of a message within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel a message travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Sms,
    Email,
}

impl MessageKind {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            other => Err(format!("unrecognised message kind: {other}")),
        }
    }
}

/// Direction of travel relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Outbound,
    Inbound,
}

impl MessageDirection {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

impl FromStr for MessageDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "outbound" => Ok(Self::Outbound),
            "inbound" => Ok(Self::Inbound),
            other => Err(format!("unrecognised message direction: {other}")),
        }
    }
}

/// Delivery lifecycle of a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Complained,
    Opened,
    Clicked,
}

impl MessageStatus {
    /// Statuses that must never be regressed to a non-terminal one.
    ///
    /// Carrier callbacks arrive unordered; a `delivered` receipt may precede
    /// the `sent` receipt, and the later `sent` must not win.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Failed | Self::Bounced | Self::Complained
        )
    }

    /// Whether a row holding `self` may move to `next`.
    ///
    /// The single forbidden move is terminal → non-terminal: late-arriving
    /// `sent` receipts must not undo a `delivered` or `failed` verdict.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        !(self.is_terminal() && !next.is_terminal())
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(Self::Queued),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            "complained" => Ok(Self::Complained),
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            other => Err(format!("unrecognised message status: {other}")),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-send audit row.
///
/// Outbound rows carry `consent_verified_at` and `quiet_hours_checked_at`
/// stamped at dispatch time; inbound rows bypass them. `provider_message_id`
/// is globally unique once set, which is what permits the reconciler's
/// cross-tenant lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub kind: MessageKind,
    pub direction: MessageDirection,
    pub to_address: String,
    pub from_address: String,
    pub content: String,
    pub segments: i32,
    pub provider_message_id: Option<String>,
    pub status: MessageStatus,
    pub provider_status: Option<String>,
    pub error_message: Option<String>,
    pub consent_verified_at: Option<DateTime<Utc>>,
    pub quiet_hours_checked_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(MessageStatus::Delivered, true)]
    #[case(MessageStatus::Failed, true)]
    #[case(MessageStatus::Bounced, true)]
    #[case(MessageStatus::Complained, true)]
    #[case(MessageStatus::Queued, false)]
    #[case(MessageStatus::Sending, false)]
    #[case(MessageStatus::Sent, false)]
    fn terminal_statuses(#[case] status: MessageStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[rstest]
    #[case("queued", MessageStatus::Queued)]
    #[case("delivered", MessageStatus::Delivered)]
    #[case("complained", MessageStatus::Complained)]
    fn status_round_trips(#[case] text: &str, #[case] status: MessageStatus) {
        assert_eq!(text.parse::<MessageStatus>().expect("parse"), status);
        assert_eq!(status.as_str(), text);
    }

    #[rstest]
    fn unknown_status_is_an_error() {
        assert!("exploded".parse::<MessageStatus>().is_err());
    }

    #[rstest]
    #[case(MessageStatus::Delivered, MessageStatus::Sent, false)]
    #[case(MessageStatus::Failed, MessageStatus::Queued, false)]
    #[case(MessageStatus::Delivered, MessageStatus::Failed, true)]
    #[case(MessageStatus::Sent, MessageStatus::Delivered, true)]
    #[case(MessageStatus::Queued, MessageStatus::Sent, true)]
    fn terminal_statuses_refuse_regression(
        #[case] current: MessageStatus,
        #[case] next: MessageStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(current.can_transition_to(next), allowed);
    }
}
