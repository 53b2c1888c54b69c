//! Contact entity: the recipient of every outbound message.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::location::LocationId;

/// Identifier of a contact within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(Uuid);

impl ContactId {
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

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a consent state change was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMethod {
    /// The recipient texted a keyword (STOP, START, ...).
    KeywordReply,
    /// The recipient followed an unsubscribe or subscribe link.
    LinkClick,
    /// A staff member changed the state by hand.
    Manual,
    /// The state arrived with a bulk contact import.
    Import,
}

impl ConsentMethod {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeywordReply => "keyword_reply",
            Self::LinkClick => "link_click",
            Self::Manual => "manual",
            Self::Import => "import",
        }
    }
}

impl FromStr for ConsentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "keyword_reply" => Ok(Self::KeywordReply),
            "link_click" => Ok(Self::LinkClick),
            "manual" => Ok(Self::Manual),
            "import" => Ok(Self::Import),
            other => Err(format!("unrecognised consent method: {other}")),
        }
    }
}

impl fmt::Display for ConsentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recipient record as the compliance gate and delivery worker see it.
///
/// Invariants enforced at the store boundary:
/// - `sms_consent` implies `sms_consent_at` is set;
/// - `sms_opted_out` implies `sms_opted_out_at` is set;
/// - `(tenant, phone)` is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: ContactId,
    /// Canonical E.164 phone number.
    pub phone: String,
    pub primary_location_id: Option<LocationId>,
    pub sms_consent: bool,
    pub sms_consent_at: Option<DateTime<Utc>>,
    pub sms_consent_method: Option<ConsentMethod>,
    /// Mirror of the (not yet implemented) email channel consent.
    pub email_consent: bool,
    pub sms_opted_out: bool,
    pub sms_opted_out_at: Option<DateTime<Utc>>,
    pub age_verified: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub tags: Vec<String>,
    /// Explicit IANA timezone override for quiet-hours resolution.
    pub timezone: Option<String>,
}

impl Contact {
    /// Age in whole years at `today`, when a date of birth is on file.
    pub fn age_years(&self, today: NaiveDate) -> Option<u32> {
        self.date_of_birth.and_then(|dob| today.years_since(dob))
    }
}
