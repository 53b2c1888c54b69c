//! Port for location persistence.

use async_trait::async_trait;

use crate::domain::location::{Location, LocationId};
use crate::domain::tenant::TenantId;

/// Errors raised by location repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationRepositoryError {
    /// Repository connection could not be established.
    #[error("location repository connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("location repository query failed: {message}")]
    Query { message: String },
}

impl LocationRepositoryError {
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

/// A location paired with its owning tenant, produced by inbound resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationHandle {
    pub tenant_id: TenantId,
    pub location: Location,
}

/// Port for location storage and retrieval.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Fetch a location by identifier within its tenant.
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: LocationId,
    ) -> Result<Option<Location>, LocationRepositoryError>;

    /// Resolve the tenant and location owning a sending phone number.
    ///
    /// Inbound webhook entry point: the tenant is unknown until this lookup
    /// answers, so the query runs without tenant scope. Sending numbers are
    /// unique across the platform.
    async fn resolve_by_sms_number(
        &self,
        phone: &str,
    ) -> Result<Option<LocationHandle>, LocationRepositoryError>;
}
