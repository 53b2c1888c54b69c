//! PostgreSQL-backed `CampaignRepository` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;

use crate::domain::campaign::{Campaign, CampaignId, CampaignStatus, CounterField};
use crate::domain::ports::{CampaignRepository, CampaignRepositoryError};
use crate::domain::tenant::TenantId;

use super::models::{campaign_from_row, CampaignRow};
use super::pool::{DbPool, StoreError};
use super::schema::campaigns;
use super::{classify_store_error, MappedStoreError};

/// Diesel-backed implementation of the `CampaignRepository` port.
#[derive(Clone)]
pub struct DieselCampaignRepository {
    pool: DbPool,
}

impl DieselCampaignRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_store_error(error: StoreError) -> CampaignRepositoryError {
    match classify_store_error(error) {
        MappedStoreError::Connection(message) => CampaignRepositoryError::connection(message),
        MappedStoreError::Query(message) => CampaignRepositoryError::query(message),
    }
}

/// Cast a recipient count to the database's signed column.
#[expect(
    clippy::cast_possible_wrap,
    reason = "recipient counts stay far below i32::MAX"
)]
fn cast_count_for_db(count: u32) -> i32 {
    count as i32
}

#[async_trait]
impl CampaignRepository for DieselCampaignRepository {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>, CampaignRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    campaigns::table
                        .filter(campaigns::tenant_id.eq(*tenant.as_uuid()))
                        .filter(campaigns::id.eq(*id.as_uuid()))
                        .select(CampaignRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        row.map(campaign_from_row)
            .transpose()
            .map_err(CampaignRepositoryError::query)
    }

    async fn mark_sending(
        &self,
        tenant: TenantId,
        id: CampaignId,
        total_recipients: u32,
        started_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError> {
        let total = cast_count_for_db(total_recipients);
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    diesel::update(
                        campaigns::table
                            .filter(campaigns::tenant_id.eq(*tenant.as_uuid()))
                            .filter(campaigns::id.eq(*id.as_uuid())),
                    )
                    .set((
                        campaigns::status.eq(CampaignStatus::Sending.as_str()),
                        campaigns::total_recipients.eq(total),
                        campaigns::started_at.eq(started_at),
                    ))
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

    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: CampaignId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), CampaignRepositoryError> {
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    diesel::update(
                        campaigns::table
                            .filter(campaigns::tenant_id.eq(*tenant.as_uuid()))
                            .filter(campaigns::id.eq(*id.as_uuid())),
                    )
                    .set((
                        campaigns::status.eq(CampaignStatus::Sent.as_str()),
                        campaigns::completed_at.eq(completed_at),
                    ))
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

    async fn increment_counter(
        &self,
        tenant: TenantId,
        id: CampaignId,
        field: CounterField,
    ) -> Result<(), CampaignRepositoryError> {
        // Single-statement in-place increments: atomic per row, so
        // concurrent status webhooks cannot lose updates.
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let target = campaigns::table
                        .filter(campaigns::tenant_id.eq(*tenant.as_uuid()))
                        .filter(campaigns::id.eq(*id.as_uuid()));
                    let result = match field {
                        CounterField::Sent => {
                            diesel::update(target)
                                .set(campaigns::sent_count.eq(campaigns::sent_count + 1))
                                .execute(conn)
                                .await
                        }
                        CounterField::Delivered => {
                            diesel::update(target)
                                .set(campaigns::delivered_count.eq(campaigns::delivered_count + 1))
                                .execute(conn)
                                .await
                        }
                        CounterField::Failed => {
                            diesel::update(target)
                                .set(campaigns::failed_count.eq(campaigns::failed_count + 1))
                                .execute(conn)
                                .await
                        }
                        CounterField::OptedOut => {
                            diesel::update(target)
                                .set(campaigns::opted_out_count.eq(campaigns::opted_out_count + 1))
                                .execute(conn)
                                .await
                        }
                    };
                    result.map(|_| ()).map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)
    }
}
