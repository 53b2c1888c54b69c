//! PostgreSQL-backed `ContactRepository` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgArrayExpressionMethods;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::campaign::{CampaignKind, CampaignTargeting};
use crate::domain::contact::{ConsentMethod, Contact, ContactId};
use crate::domain::ports::{ContactRepository, ContactRepositoryError};
use crate::domain::tenant::TenantId;

use super::models::{contact_from_row, ContactRow};
use super::pool::{DbPool, StoreError};
use super::schema::contacts;
use super::{classify_store_error, MappedStoreError};

/// Diesel-backed implementation of the `ContactRepository` port.
#[derive(Clone)]
pub struct DieselContactRepository {
    pool: DbPool,
}

impl DieselContactRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_store_error(error: StoreError) -> ContactRepositoryError {
    match classify_store_error(error) {
        MappedStoreError::Connection(message) => ContactRepositoryError::connection(message),
        MappedStoreError::Query(message) => ContactRepositoryError::query(message),
    }
}

#[async_trait]
impl ContactRepository for DieselContactRepository {
    async fn find_by_id(
        &self,
        tenant: TenantId,
        id: ContactId,
    ) -> Result<Option<Contact>, ContactRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    contacts::table
                        .filter(contacts::tenant_id.eq(*tenant.as_uuid()))
                        .filter(contacts::id.eq(*id.as_uuid()))
                        .select(ContactRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        row.map(contact_from_row)
            .transpose()
            .map_err(ContactRepositoryError::query)
    }

    async fn find_by_phone(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> Result<Option<Contact>, ContactRepositoryError> {
        let phone = phone.to_string();
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    contacts::table
                        .filter(contacts::tenant_id.eq(*tenant.as_uuid()))
                        .filter(contacts::phone.eq(phone))
                        .select(ContactRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        row.map(contact_from_row)
            .transpose()
            .map_err(ContactRepositoryError::query)
    }

    async fn record_opt_out(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
    ) -> Result<(), ContactRepositoryError> {
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    // The opted-out filter keeps the original timestamp on
                    // repeat opt-outs.
                    diesel::update(
                        contacts::table
                            .filter(contacts::tenant_id.eq(*tenant.as_uuid()))
                            .filter(contacts::id.eq(*id.as_uuid()))
                            .filter(contacts::sms_opted_out.eq(false)),
                    )
                    .set((
                        contacts::sms_opted_out.eq(true),
                        contacts::sms_opted_out_at.eq(at),
                        contacts::updated_at.eq(at),
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

    async fn record_opt_in(
        &self,
        tenant: TenantId,
        id: ContactId,
        at: DateTime<Utc>,
        method: ConsentMethod,
    ) -> Result<(), ContactRepositoryError> {
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    diesel::update(
                        contacts::table
                            .filter(contacts::tenant_id.eq(*tenant.as_uuid()))
                            .filter(contacts::id.eq(*id.as_uuid())),
                    )
                    .set((
                        contacts::sms_opted_out.eq(false),
                        contacts::sms_opted_out_at.eq(None::<DateTime<Utc>>),
                        contacts::sms_consent.eq(true),
                        contacts::sms_consent_at.eq(at),
                        contacts::sms_consent_method.eq(method.as_str()),
                        contacts::updated_at.eq(at),
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

    async fn find_campaign_recipients(
        &self,
        tenant: TenantId,
        kind: CampaignKind,
        targeting: &CampaignTargeting,
    ) -> Result<Vec<Contact>, ContactRepositoryError> {
        let location_ids: Vec<Option<Uuid>> = targeting
            .location_ids
            .iter()
            .map(|id| Some(*id.as_uuid()))
            .collect();
        let tags = targeting.tags.clone();

        let rows = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let mut query = contacts::table
                        .filter(contacts::tenant_id.eq(*tenant.as_uuid()))
                        .filter(contacts::age_verified.eq(true))
                        .into_boxed();

                    if kind.touches_sms() {
                        query = query
                            .filter(contacts::sms_consent.eq(true))
                            .filter(contacts::sms_opted_out.eq(false));
                    }
                    if kind.touches_email() {
                        query = query.filter(contacts::email_consent.eq(true));
                    }
                    if !location_ids.is_empty() {
                        query = query.filter(contacts::primary_location_id.eq_any(location_ids));
                    }
                    if !tags.is_empty() {
                        query = query.filter(contacts::tags.overlaps_with(tags));
                    }

                    query
                        .select(ContactRow::as_select())
                        .load(conn)
                        .await
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        rows.into_iter()
            .map(contact_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ContactRepositoryError::query)
    }
}
