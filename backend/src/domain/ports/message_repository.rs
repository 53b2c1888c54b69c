//! Port for message persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::campaign::CampaignId;
use crate::domain::contact::ContactId;
use crate::domain::message::{Message, MessageId, MessageKind, MessageStatus};
use crate::domain::tenant::TenantId;

/// Errors raised by message repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageRepositoryError {
    /// Repository connection could not be established.
    #[error("message repository connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("message repository query failed: {message}")]
    Query { message: String },
}

impl MessageRepositoryError {
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

/// Fields for a new outbound SMS audit row, inserted with status `queued`.
///
/// The audit timestamps are `None` only on the opt-out confirmation path,
/// which targets a phone rather than a consenting contact.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboundSms {
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub to_address: String,
    pub from_address: String,
    pub content: String,
    pub consent_verified_at: Option<DateTime<Utc>>,
    pub quiet_hours_checked_at: Option<DateTime<Utc>>,
}

/// Fields for a new inbound SMS audit row, inserted with status `delivered`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInboundSms {
    pub contact_id: Option<ContactId>,
    pub to_address: String,
    pub from_address: String,
    pub content: String,
    pub provider_message_id: Option<String>,
}

/// Status transition requested by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: MessageStatus,
    pub provider_status: Option<String>,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Result of applying a status update.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedStatus {
    /// False when the row already held the target status, or when a terminal
    /// status refused regression to a non-terminal one.
    pub changed: bool,
    pub message: Message,
}

/// Port for message audit rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert an outbound SMS row with status `queued`, created at `at`.
    async fn insert_outbound(
        &self,
        tenant: TenantId,
        new: NewOutboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError>;

    /// Insert an inbound SMS row with status `delivered`, created at `at`.
    async fn insert_inbound(
        &self,
        tenant: TenantId,
        new: NewInboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError>;

    /// Record a successful provider dispatch: status `sent`, provider id,
    /// billable segments.
    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: MessageId,
        provider_message_id: &str,
        segments: i32,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError>;

    /// Record a failed provider dispatch: status `failed` plus the provider's
    /// error text.
    async fn mark_failed(
        &self,
        tenant: TenantId,
        id: MessageId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError>;

    /// Count outbound rows of `kind` addressed to `contact` created at or
    /// after `since`. Drives the trailing-24-hour rate-limit check.
    async fn count_outbound_since(
        &self,
        tenant: TenantId,
        contact: ContactId,
        kind: MessageKind,
        since: DateTime<Utc>,
    ) -> Result<u64, MessageRepositoryError>;

    /// Fetch a message by provider message id.
    ///
    /// Provider ids are globally unique, so this is the one read that is
    /// permitted to cross tenants: status webhooks carry no tenant context.
    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MessageRepositoryError>;

    /// Apply a reconciliation status update.
    ///
    /// Refuses to regress a terminal status (`delivered`, `failed`,
    /// `bounced`, `complained`) to a non-terminal one, and reports whether
    /// the row actually changed so callers can keep counter increments
    /// idempotent under webhook replay.
    async fn apply_status(
        &self,
        tenant: TenantId,
        id: MessageId,
        update: StatusUpdate,
    ) -> Result<AppliedStatus, MessageRepositoryError>;
}
