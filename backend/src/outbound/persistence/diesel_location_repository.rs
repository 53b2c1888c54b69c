//! PostgreSQL-backed `LocationRepository` implementation.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;

use crate::domain::location::{Location, LocationId};
use crate::domain::ports::{LocationHandle, LocationRepository, LocationRepositoryError};
use crate::domain::tenant::TenantId;

use super::models::{location_from_row, LocationRow};
use super::pool::{DbPool, StoreError};
use super::schema::locations;
use super::{classify_store_error, MappedStoreError};

/// Diesel-backed implementation of the `LocationRepository` port.
#[derive(Clone)]
pub struct DieselLocationRepository {
    pool: DbPool,
}

impl DieselLocationRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_store_error(error: StoreError) -> LocationRepositoryError {
    match classify_store_error(error) {
        MappedStoreError::Connection(message) => LocationRepositoryError::connection(message),
        MappedStoreError::Query(message) => LocationRepositoryError::query(message),
    }
}

#[async_trait]
impl LocationRepository for DieselLocationRepository {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: LocationId,
    ) -> Result<Option<Location>, LocationRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    locations::table
                        .filter(locations::tenant_id.eq(*tenant.as_uuid()))
                        .filter(locations::id.eq(*id.as_uuid()))
                        .select(LocationRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        Ok(row.map(location_from_row))
    }

    async fn resolve_by_sms_number(
        &self,
        phone: &str,
    ) -> Result<Option<LocationHandle>, LocationRepositoryError> {
        let phone = phone.to_string();
        // Inbound entry point: the tenant is unknown until this row answers,
        // so the lookup runs without tenant scope.
        let row = self
            .pool
            .unscoped(move |conn| {
                async move {
                    locations::table
                        .filter(locations::sms_phone_number.eq(phone))
                        .select(LocationRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        Ok(row.map(|row| LocationHandle {
            tenant_id: row.tenant(),
            location: location_from_row(row),
        }))
    }
}
