//! Port for opt-out audit logging and the cross-tenant opt-out table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::opt_out::OptOutLogEntry;
use crate::domain::tenant::TenantId;

/// Errors raised by opt-out repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptOutRepositoryError {
    /// Repository connection could not be established.
    #[error("opt-out repository connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("opt-out repository query failed: {message}")]
    Query { message: String },
}

impl OptOutRepositoryError {
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

/// Port for the opt-out audit log and the global opt-out table.
///
/// The global table spans all tenants: once any tenant's recipient opts out,
/// no tenant may message that number. Its writes are commutative (insert is
/// conflict-ignoring, delete unconditional) so concurrent webhook
/// processing needs no locking here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OptOutRepository: Send + Sync {
    /// Append an immutable audit record for an opt-in or opt-out action.
    async fn append_log(
        &self,
        tenant: TenantId,
        entry: &OptOutLogEntry,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError>;

    /// Whether the phone appears in the global opt-out table.
    async fn is_globally_opted_out(&self, phone: &str)
        -> Result<bool, OptOutRepositoryError>;

    /// Record a phone in the global table; a no-op when already present.
    async fn record_global(
        &self,
        phone: &str,
        source_tenant: TenantId,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError>;

    /// Remove a phone from the global table; a no-op when absent.
    async fn clear_global(&self, phone: &str) -> Result<(), OptOutRepositoryError>;
}
