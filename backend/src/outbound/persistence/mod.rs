//! PostgreSQL persistence adapters implementing the repository ports.

pub mod models;
pub mod pool;
pub mod schema;

mod diesel_campaign_repository;
mod diesel_contact_repository;
mod diesel_location_repository;
mod diesel_message_repository;
mod diesel_opt_out_repository;

pub use diesel_campaign_repository::DieselCampaignRepository;
pub use diesel_contact_repository::DieselContactRepository;
pub use diesel_location_repository::DieselLocationRepository;
pub use diesel_message_repository::DieselMessageRepository;
pub use diesel_opt_out_repository::DieselOptOutRepository;
pub use pool::{DbPool, PoolConfig, StoreError};

use tracing::debug;

/// Store error reduced to the two shapes every port error offers.
pub(crate) enum MappedStoreError {
    Connection(String),
    Query(String),
}

/// Classify a store error, logging diagnostics and redacting database detail
/// from the message that travels upward.
pub(crate) fn classify_store_error(error: StoreError) -> MappedStoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        StoreError::Checkout { message } | StoreError::Build { message } => {
            MappedStoreError::Connection(message)
        }
        StoreError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            info,
        )) => MappedStoreError::Connection(info.message().to_string()),
        StoreError::Database(DieselError::NotFound) => {
            MappedStoreError::Query("record not found".to_string())
        }
        StoreError::Database(error) => {
            debug!(error = %error, "diesel operation failed");
            MappedStoreError::Query("database error".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn checkout_errors_classify_as_connection() {
        let mapped = classify_store_error(StoreError::checkout("refused"));
        assert!(matches!(mapped, MappedStoreError::Connection(message) if message == "refused"));
    }

    #[rstest]
    fn not_found_classifies_as_query() {
        let mapped = classify_store_error(StoreError::Database(diesel::result::Error::NotFound));
        assert!(
            matches!(mapped, MappedStoreError::Query(message) if message == "record not found")
        );
    }

    #[rstest]
    fn other_database_errors_are_redacted() {
        let mapped = classify_store_error(StoreError::Database(
            diesel::result::Error::QueryBuilderError("secret table detail".into()),
        ));
        assert!(matches!(mapped, MappedStoreError::Query(message) if message == "database error"));
    }
}
