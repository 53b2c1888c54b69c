//! Port for contact persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::campaign::{CampaignKind, CampaignTargeting};
use crate::domain::contact::{ConsentMethod, Contact, ContactId};
use crate::domain::tenant::TenantId;

/// Errors raised by contact repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactRepositoryError {
    /// Repository connection could not be established.
    #[error("contact repository connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("contact repository query failed: {message}")]
    Query { message: String },
}

impl ContactRepositoryError {
    /// Create a connection error with the given message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error with the given message.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// Port for contact storage and retrieval.
///
/// Every operation is tenant-scoped; adapters must execute the underlying
/// statements with the tenant scope applied so a wrong or missing tenant
/// yields zero rows, never another tenant's contacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Fetch a contact by identifier.
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: ContactId,
    ) -> Result<Option<Contact>, ContactRepositoryError>;

    /// Fetch a contact by canonical E.164 phone number.
    async fn find_by_phone(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> Result<Option<Contact>, ContactRepositoryError>;

    /// Flag the contact as opted out of SMS.
    ///
    /// Idempotent: an already-opted-out contact keeps its original
    /// `sms_opted_out_at`.
    async fn record_opt_out(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
    ) -> Result<(), ContactRepositoryError>;

    /// Clear the opt-out flag and grant SMS consent.
    async fn record_opt_in(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
        method: ConsentMethod,
    ) -> Result<(), ContactRepositoryError>;

    /// Resolve a campaign's targeting filter to its recipient set.
    ///
    /// Always restricted to age-verified contacts; channel consent and
    /// opt-out filters follow the campaign kind; location and tag filters
    /// apply only when the corresponding targeting collections are nonempty.
    async fn find_campaign_recipients(
        &self,
        tenant: TenantId,
        kind: CampaignKind,
        targeting: &CampaignTargeting,
    ) -> Result<Vec<Contact>, ContactRepositoryError>;
}
