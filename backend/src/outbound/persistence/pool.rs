//! Async connection pool with tenant-scoped transactions.
//!
//! Wraps `diesel-async` and `bb8`. The pool is the single place tenant scope
//! is applied: [`DbPool::in_tenant_tx`] opens a transaction and sets the
//! row-level-security session variable `app.current_tenant` with
//! `set_config(..., true)`, so the variable is transaction-local and the
//! connection returns to the pool carrying no scope. Forgetting the scope
//! makes tenant-scoped tables return zero rows; it can never leak another
//! tenant's data.

use std::time::Duration;

use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::{ScopedBoxFuture, ScopedFutureExt};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::domain::tenant::TenantId;

/// Errors that can occur during pool or transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to check out a connection from the pool.
    #[error("failed to get connection from pool: {message}")]
    Checkout { message: String },

    /// Failed to build the connection pool.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },

    /// A statement failed during execution.
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

impl StoreError {
    /// Create a checkout error with the given message.
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Create a new configuration with the given database URL.
    ///
    /// Defaults: 10 connections maximum, 2 idle minimum, 30 second checkout
    /// timeout.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: 10,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections in the pool.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the minimum number of idle connections to maintain.
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Async PostgreSQL connection pool shared by all repository adapters.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Create a new connection pool with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Build`] when the pool cannot be constructed.
    pub async fn new(config: PoolConfig) -> Result<Self, StoreError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| StoreError::build(err.to_string()))?;

        Ok(Self { inner: pool })
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, StoreError> {
        self.inner
            .get()
            .await
            .map_err(|err| StoreError::checkout(err.to_string()))
    }

    /// Run `op` inside a transaction scoped to `tenant`.
    ///
    /// The tenant id is a required argument by design: no thread-local or
    /// connection-sticky ambient state exists, so a caller cannot forget to
    /// choose a tenant. `set_config(..., is_local := true)` confines the
    /// RLS variable to this transaction; commit or rollback clears it before
    /// the connection is reused.
    pub async fn in_tenant_tx<'a, R, F>(&self, tenant: TenantId, op: F) -> Result<R, StoreError>
    where
        F: for<'c> FnOnce(&'c mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'c, Result<R, StoreError>>
            + Send
            + 'a,
        R: Send + 'a,
    {
        let mut conn = self.get().await?;
        conn.transaction::<R, StoreError, _>(|conn| {
            async move {
                diesel::sql_query("SELECT set_config('app.current_tenant', $1, true)")
                    .bind::<diesel::sql_types::Text, _>(tenant.to_string())
                    .execute(conn)
                    .await?;
                op(conn).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Run `op` on a connection without tenant scope.
    ///
    /// Reserved for the global tables (`tenants`, `global_opt_outs`) and the
    /// two reconciliation entry lookups that run before a tenant is known:
    /// message-by-provider-id and location-by-sending-number.
    pub async fn unscoped<'a, R, F>(&self, op: F) -> Result<R, StoreError>
    where
        F: for<'c> FnOnce(&'c mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'c, Result<R, StoreError>>
            + Send
            + 'a,
        R: Send + 'a,
    {
        let mut conn = self.get().await?;
        op(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_config_default_values() {
        let config = PoolConfig::new("postgres://localhost/test");

        assert_eq!(config.database_url(), "postgres://localhost/test");
        assert_eq!(config.max_size, 10);
        assert_eq!(config.min_idle, Some(2));
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
    }

    #[rstest]
    fn pool_config_builder_pattern() {
        let config = PoolConfig::new("postgres://localhost/test")
            .with_max_size(4)
            .with_min_idle(Some(1))
            .with_connection_timeout(Duration::from_secs(5));

        assert_eq!(config.max_size, 4);
        assert_eq!(config.min_idle, Some(1));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[rstest]
    fn store_error_display_preserves_messages() {
        let checkout = StoreError::checkout("connection refused");
        let build = StoreError::build("invalid URL");

        assert!(checkout.to_string().contains("connection refused"));
        assert!(build.to_string().contains("invalid URL"));
    }
}
