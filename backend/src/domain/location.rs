//! Location entity: a physical retail site with its own sending identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a location within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(Uuid);

impl LocationId {
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

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-tenant retail site.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    /// Two-letter US state code, consumed by per-state compliance rules.
    pub us_state: String,
    /// IANA timezone of the site, the quiet-hours fallback for its contacts.
    pub timezone: String,
    /// Dedicated sending number. When absent the tenant's default messaging
    /// profile is the sending identity instead.
    pub sms_phone_number: Option<String>,
}
