//! Campaign entity: a one-time broadcast to a filtered recipient set.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::location::LocationId;

/// Identifier of a campaign within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(Uuid);

impl CampaignId {
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

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Channels a campaign broadcasts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    Sms,
    Email,
    Both,
}

impl CampaignKind {
    /// Whether expansion must apply SMS consent and opt-out filters.
    pub fn touches_sms(&self) -> bool {
        matches!(self, Self::Sms | Self::Both)
    }

    /// Whether expansion must apply email consent filters.
    pub fn touches_email(&self) -> bool {
        matches!(self, Self::Email | Self::Both)
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Both => "both",
        }
    }
}

impl FromStr for CampaignKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "both" => Ok(Self::Both),
            other => Err(format!("unrecognised campaign kind: {other}")),
        }
    }
}

/// Campaign lifecycle.
///
/// `draft → scheduled → sending → sent` with `sent` terminal; `paused` and
/// `cancelled` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Paused,
    Cancelled,
}

impl CampaignStatus {
    /// States from which no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unrecognised campaign status: {other}")),
        }
    }
}

/// Recipient filter. Empty collections mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignTargeting {
    pub location_ids: Vec<LocationId>,
    pub tags: Vec<String>,
}

/// Aggregate delivery counters, advanced asynchronously by reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignCounters {
    pub total_recipients: u32,
    pub sent: u32,
    pub delivered: u32,
    pub failed: u32,
    pub opened: u32,
    pub clicked: u32,
    pub opted_out: u32,
}

/// Counter column addressed by an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Sent,
    Delivered,
    Failed,
    OptedOut,
}

/// One-time broadcast with targeting and aggregate counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub kind: CampaignKind,
    pub sms_content: Option<String>,
    pub email_subject: Option<String>,
    pub email_content: Option<String>,
    pub targeting: CampaignTargeting,
    pub status: CampaignStatus,
    pub counters: CampaignCounters,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
