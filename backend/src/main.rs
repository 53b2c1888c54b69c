//! Backend entry-point: send API, carrier webhooks, and delivery workers.

use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use backend::server::config::AppSettings;

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    // Configuration gaps are fatal: a messaging pipeline with a missing
    // database URL or carrier key must not come up half-alive.
    let settings = AppSettings::load().map_err(std::io::Error::other)?;
    backend::server::run(settings).await
}
