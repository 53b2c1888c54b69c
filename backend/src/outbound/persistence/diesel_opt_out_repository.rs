//! PostgreSQL-backed `OptOutRepository` implementation.
//!
//! The audit log is tenant-scoped; the global opt-out table is deliberately
//! not. Global writes are commutative (conflict-ignoring insert,
//! unconditional delete) so concurrent webhook processing needs no locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::opt_out::OptOutLogEntry;
use crate::domain::ports::{OptOutRepository, OptOutRepositoryError};
use crate::domain::tenant::TenantId;

use super::models::{NewGlobalOptOutRow, NewOptOutLogRow};
use super::pool::{DbPool, StoreError};
use super::schema::{global_opt_outs, opt_out_log};
use super::{classify_store_error, MappedStoreError};

/// Diesel-backed implementation of the `OptOutRepository` port.
#[derive(Clone)]
pub struct DieselOptOutRepository {
    pool: DbPool,
}

impl DieselOptOutRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_store_error(error: StoreError) -> OptOutRepositoryError {
    match classify_store_error(error) {
        MappedStoreError::Connection(message) => OptOutRepositoryError::connection(message),
        MappedStoreError::Query(message) => OptOutRepositoryError::query(message),
    }
}

#[async_trait]
impl OptOutRepository for DieselOptOutRepository {
    async fn append_log(
        &self,
        tenant: TenantId,
        entry: &OptOutLogEntry,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError> {
        let entry = entry.clone();
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let insert = NewOptOutLogRow {
                        id: Uuid::new_v4(),
                        tenant_id: *tenant.as_uuid(),
                        contact_id: entry.contact_id.map(|id| *id.as_uuid()),
                        channel: entry.channel.as_str(),
                        address: &entry.address,
                        action: entry.action.as_str(),
                        method: entry.method.as_str(),
                        source_message_id: entry.source_message_id.map(|id| *id.as_uuid()),
                        created_at: at,
                    };
                    diesel::insert_into(opt_out_log::table)
                        .values(&insert)
                        .execute(conn)
                        .await
                        .map(|_| ())
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)
    }

    async fn is_globally_opted_out(
        &self,
        phone: &str,
    ) -> Result<bool, OptOutRepositoryError> {
        let phone = phone.to_string();
        self.pool
            .unscoped(move |conn| {
                async move {
                    diesel::select(diesel::dsl::exists(
                        global_opt_outs::table.filter(global_opt_outs::phone.eq(phone)),
                    ))
                    .get_result(conn)
                    .await
                    .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)
    }

    async fn record_global(
        &self,
        phone: &str,
        source_tenant: TenantId,
        at: DateTime<Utc>,
    ) -> Result<(), OptOutRepositoryError> {
        let phone = phone.to_string();
        self.pool
            .unscoped(move |conn| {
                async move {
                    let insert = NewGlobalOptOutRow {
                        phone: &phone,
                        source_tenant_id: *source_tenant.as_uuid(),
                        opted_out_at: at,
                    };
                    // Conflict-ignoring: the first recording tenant wins and
                    // repeats are no-ops.
                    diesel::insert_into(global_opt_outs::table)
                        .values(&insert)
                        .on_conflict(global_opt_outs::phone)
                        .do_nothing()
                        .execute(conn)
                        .await
                        .map(|_| ())
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)
    }

    async fn clear_global(&self, phone: &str) -> Result<(), OptOutRepositoryError> {
        let phone = phone.to_string();
        self.pool
            .unscoped(move |conn| {
                async move {
                    diesel::delete(
                        global_opt_outs::table.filter(global_opt_outs::phone.eq(phone)),
                    )
                    .execute(conn)
                    .await
                    .map(|_| ())
                    .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn store_errors_map_to_port_shapes() {
        assert!(matches!(
            map_store_error(StoreError::checkout("nope")),
            OptOutRepositoryError::Connection { .. }
        ));
        assert!(matches!(
            map_store_error(StoreError::Database(diesel::result::Error::NotFound)),
            OptOutRepositoryError::Query { .. }
        ));
    }
}
