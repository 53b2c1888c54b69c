//! PostgreSQL-backed `MessageRepository` implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::contact::ContactId;
use crate::domain::message::{
    Message, MessageDirection, MessageId, MessageKind, MessageStatus,
};
use crate::domain::ports::{
    AppliedStatus, MessageRepository, MessageRepositoryError, NewInboundSms, NewOutboundSms,
    StatusUpdate,
};
use crate::domain::tenant::TenantId;

use super::models::{message_from_row, MessageRow, NewMessageRow};
use super::pool::{DbPool, StoreError};
use super::schema::messages;
use super::{classify_store_error, MappedStoreError};

/// Diesel-backed implementation of the `MessageRepository` port.
#[derive(Clone)]
pub struct DieselMessageRepository {
    pool: DbPool,
}

impl DieselMessageRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_store_error(error: StoreError) -> MessageRepositoryError {
    match classify_store_error(error) {
        MappedStoreError::Connection(message) => MessageRepositoryError::connection(message),
        MappedStoreError::Query(message) => MessageRepositoryError::query(message),
    }
}

/// Lift an enum-parse failure out of a transaction as a store error.
fn parse_failure(message: String) -> StoreError {
    StoreError::Database(diesel::result::Error::DeserializationError(message.into()))
}

#[async_trait]
impl MessageRepository for DieselMessageRepository {
    async fn insert_outbound(
        &self,
        tenant: TenantId,
        new: NewOutboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let insert = NewMessageRow {
                        id: Uuid::new_v4(),
                        tenant_id: *tenant.as_uuid(),
                        contact_id: new.contact_id.map(|id| *id.as_uuid()),
                        campaign_id: new.campaign_id.map(|id| *id.as_uuid()),
                        kind: MessageKind::Sms.as_str(),
                        direction: MessageDirection::Outbound.as_str(),
                        to_address: &new.to_address,
                        from_address: &new.from_address,
                        content: &new.content,
                        segments: 1,
                        provider_message_id: None,
                        status: MessageStatus::Queued.as_str(),
                        consent_verified_at: new.consent_verified_at,
                        quiet_hours_checked_at: new.quiet_hours_checked_at,
                        delivered_at: None,
                        status_updated_at: at,
                        created_at: at,
                    };
                    diesel::insert_into(messages::table)
                        .values(&insert)
                        .returning(MessageRow::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        message_from_row(row).map_err(MessageRepositoryError::query)
    }

    async fn insert_inbound(
        &self,
        tenant: TenantId,
        new: NewInboundSms,
        at: DateTime<Utc>,
    ) -> Result<Message, MessageRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let insert = NewMessageRow {
                        id: Uuid::new_v4(),
                        tenant_id: *tenant.as_uuid(),
                        contact_id: new.contact_id.map(|id| *id.as_uuid()),
                        campaign_id: None,
                        kind: MessageKind::Sms.as_str(),
                        direction: MessageDirection::Inbound.as_str(),
                        to_address: &new.to_address,
                        from_address: &new.from_address,
                        content: &new.content,
                        segments: 1,
                        provider_message_id: new.provider_message_id.as_deref(),
                        status: MessageStatus::Delivered.as_str(),
                        consent_verified_at: None,
                        quiet_hours_checked_at: None,
                        delivered_at: Some(at),
                        status_updated_at: at,
                        created_at: at,
                    };
                    diesel::insert_into(messages::table)
                        .values(&insert)
                        .returning(MessageRow::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        message_from_row(row).map_err(MessageRepositoryError::query)
    }

    async fn mark_sent(
        &self,
        tenant: TenantId,
        id: MessageId,
        provider_message_id: &str,
        segments: i32,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError> {
        let provider_message_id = provider_message_id.to_string();
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    diesel::update(
                        messages::table
                            .filter(messages::tenant_id.eq(*tenant.as_uuid()))
                            .filter(messages::id.eq(*id.as_uuid())),
                    )
                    .set((
                        messages::status.eq(MessageStatus::Sent.as_str()),
                        messages::provider_message_id.eq(provider_message_id),
                        messages::segments.eq(segments),
                        messages::status_updated_at.eq(at),
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

    async fn mark_failed(
        &self,
        tenant: TenantId,
        id: MessageId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), MessageRepositoryError> {
        let error = error.to_string();
        self.pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    diesel::update(
                        messages::table
                            .filter(messages::tenant_id.eq(*tenant.as_uuid()))
                            .filter(messages::id.eq(*id.as_uuid())),
                    )
                    .set((
                        messages::status.eq(MessageStatus::Failed.as_str()),
                        messages::error_message.eq(error),
                        messages::status_updated_at.eq(at),
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

    async fn count_outbound_since(
        &self,
        tenant: TenantId,
        contact: ContactId,
        kind: MessageKind,
        since: DateTime<Utc>,
    ) -> Result<u64, MessageRepositoryError> {
        let count: i64 = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    messages::table
                        .filter(messages::tenant_id.eq(*tenant.as_uuid()))
                        .filter(messages::contact_id.eq(Some(*contact.as_uuid())))
                        .filter(messages::kind.eq(kind.as_str()))
                        .filter(messages::direction.eq(MessageDirection::Outbound.as_str()))
                        .filter(messages::created_at.ge(since))
                        .count()
                        .get_result(conn)
                        .await
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        Ok(count.max(0) as u64)
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MessageRepositoryError> {
        let provider_message_id = provider_message_id.to_string();
        // Provider ids are globally unique; status webhooks carry no tenant,
        // so this one lookup runs without tenant scope.
        let row = self
            .pool
            .unscoped(move |conn| {
                async move {
                    messages::table
                        .filter(messages::provider_message_id.eq(provider_message_id))
                        .select(MessageRow::as_select())
                        .first(conn)
                        .await
                        .optional()
                        .map_err(StoreError::from)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        row.map(message_from_row)
            .transpose()
            .map_err(MessageRepositoryError::query)
    }

    async fn apply_status(
        &self,
        tenant: TenantId,
        id: MessageId,
        update: StatusUpdate,
    ) -> Result<AppliedStatus, MessageRepositoryError> {
        let row = self
            .pool
            .in_tenant_tx(tenant, move |conn| {
                async move {
                    let target = || {
                        messages::table
                            .filter(messages::tenant_id.eq(*tenant.as_uuid()))
                            .filter(messages::id.eq(*id.as_uuid()))
                    };

                    // Row lock serialises concurrent webhook deliveries for
                    // the same message.
                    let current: MessageRow = target()
                        .for_update()
                        .select(MessageRow::as_select())
                        .first(conn)
                        .await
                        .map_err(StoreError::from)?;
                    let current_status: MessageStatus =
                        current.status.parse().map_err(parse_failure)?;

                    if !current_status.can_transition_to(update.status) {
                        return Ok((false, current));
                    }

                    let changed = current_status != update.status;
                    diesel::update(target())
                        .set((
                            messages::provider_status.eq(update.provider_status.as_deref()),
                            messages::status.eq(if changed {
                                update.status.as_str()
                            } else {
                                current_status.as_str()
                            }),
                        ))
                        .execute(conn)
                        .await
                        .map_err(StoreError::from)?;
                    if changed {
                        diesel::update(target())
                            .set(messages::status_updated_at.eq(update.at))
                            .execute(conn)
                            .await
                            .map_err(StoreError::from)?;
                    }
                    if let Some(delivered_at) = update.delivered_at {
                        diesel::update(target())
                            .set(messages::delivered_at.eq(delivered_at))
                            .execute(conn)
                            .await
                            .map_err(StoreError::from)?;
                    }
                    if let Some(error) = update.error_message.as_deref() {
                        diesel::update(target())
                            .set(messages::error_message.eq(error))
                            .execute(conn)
                            .await
                            .map_err(StoreError::from)?;
                    }

                    let refreshed: MessageRow = target()
                        .select(MessageRow::as_select())
                        .first(conn)
                        .await
                        .map_err(StoreError::from)?;
                    Ok((changed, refreshed))
                }
                .scope_boxed()
            })
            .await
            .map_err(map_store_error)?;

        let (changed, row) = row;
        Ok(AppliedStatus {
            changed,
            message: message_from_row(row).map_err(MessageRepositoryError::query)?,
        })
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
            MessageRepositoryError::Connection { .. }
        ));
        assert!(matches!(
            map_store_error(StoreError::Database(diesel::result::Error::NotFound)),
            MessageRepositoryError::Query { .. }
        ));
    }

    #[rstest]
    fn parse_failures_become_database_errors() {
        let error = parse_failure("unrecognised message status: odd".to_string());
        assert!(matches!(error, StoreError::Database(_)));
        assert!(error.to_string().contains("odd"));
    }
}
