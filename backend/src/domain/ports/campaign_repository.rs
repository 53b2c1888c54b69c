//! Port for campaign persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::campaign::{Campaign, CampaignId, CounterField};
use crate::domain::tenant::TenantId;

/// Errors raised by campaign repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CampaignRepositoryError {
    /// Repository connection could not be established.
    #[error("campaign repository connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("campaign repository query failed: {message}")]
    Query { message: String },
}

impl CampaignRepositoryError {
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

/// Port for campaign storage, lifecycle stamps, and counter increments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Fetch a campaign by identifier.
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>, CampaignRepositoryError>;

    /// Stamp the campaign as expanding: status, recipient count, start time.
    async fn mark_sending(
        &self,
        tenant: TenantId,
        id: CampaignId,
        total_recipients: u32,
        started_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError>;

    /// Stamp the campaign as fully expanded.
    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: CampaignId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError>;

    /// Atomically increment one delivery counter.
    ///
    /// Must be a single-statement in-place increment so concurrent status
    /// webhooks for the same campaign cannot lose updates.
    async fn increment_counter(
        &self,
        tenant: TenantId,
        id: CampaignId,
        field: CounterField,
    ) -> Result<(), CampaignRepositoryError>;
}
