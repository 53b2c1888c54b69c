//! Application bootstrap: wire adapters to domain services and start serving.

pub mod config;

use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use mockable::{Clock, DefaultClock};
use tracing::info;

use crate::domain::campaign_expander::CampaignExpander;
use crate::domain::compliance::ComplianceGate;
use crate::domain::delivery_worker::{DeliveryRouter, SmsDeliveryWorker};
use crate::domain::ports::NoStateRules;
use crate::domain::reconciler::InboundReconciler;
use crate::domain::send_service::SendService;
use crate::inbound::http::send::{send_campaign, send_sms};
use crate::inbound::http::signature::WebhookVerifier;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::webhooks::telnyx_webhook;
use crate::outbound::persistence::{
    DbPool, DieselCampaignRepository, DieselContactRepository, DieselLocationRepository,
    DieselMessageRepository, DieselOptOutRepository, PoolConfig,
};
use crate::outbound::provider::{TelnyxProvider, TelnyxProviderConfig};
use crate::outbound::queue::{
    QueueRuntime, RateLimiterConfig, RedisDeliveryQueue, TokenBucket, WorkerPoolConfig,
};

use config::AppSettings;

/// Build every adapter and service, start the delivery workers, and serve
/// HTTP until shutdown.
pub async fn run(settings: AppSettings) -> io::Result<()> {
    let pool = DbPool::new(
        PoolConfig::new(&settings.database.url)
            .with_max_size(settings.database.pool_max)
            .with_min_idle(Some(settings.database.pool_min)),
    )
    .await
    .map_err(io::Error::other)?;

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let contacts = Arc::new(DieselContactRepository::new(pool.clone()));
    let locations = Arc::new(DieselLocationRepository::new(pool.clone()));
    let campaigns = Arc::new(DieselCampaignRepository::new(pool.clone()));
    let messages = Arc::new(DieselMessageRepository::new(pool.clone()));
    let opt_outs = Arc::new(DieselOptOutRepository::new(pool.clone()));

    let policy = settings.compliance.policy().map_err(io::Error::other)?;
    let gate = Arc::new(ComplianceGate::new(
        contacts.clone(),
        locations.clone(),
        messages.clone(),
        opt_outs.clone(),
        Arc::new(NoStateRules),
        clock.clone(),
        policy,
    ));

    let queue = RedisDeliveryQueue::connect(&settings.redis.url, clock.clone())
        .await
        .map_err(io::Error::other)?;
    let send = Arc::new(SendService::new(
        gate.clone(),
        Arc::new(queue.clone()),
        clock.clone(),
    ));

    let provider = Arc::new(
        TelnyxProvider::new(TelnyxProviderConfig::new(settings.provider.api_key.clone()))
            .map_err(io::Error::other)?,
    );

    let sms_worker = Arc::new(SmsDeliveryWorker::new(
        gate.clone(),
        locations.clone(),
        messages.clone(),
        campaigns.clone(),
        provider.clone(),
        clock.clone(),
        settings.provider.messaging_profile_id.clone(),
    ));
    let expander = Arc::new(CampaignExpander::new(
        campaigns.clone(),
        contacts.clone(),
        send.clone(),
        clock.clone(),
    ));
    let router = Arc::new(DeliveryRouter::new(sms_worker, expander));

    let limiter = Arc::new(TokenBucket::new(RateLimiterConfig::default(), clock.clone()));
    let runtime = Arc::new(QueueRuntime::new(
        queue,
        router,
        limiter,
        WorkerPoolConfig::default(),
    ));
    // Worker loops run for the life of the process.
    let _worker_handles = runtime.spawn();

    let reconciler = Arc::new(InboundReconciler::new(
        contacts,
        locations,
        messages,
        campaigns,
        opt_outs,
        provider,
        clock.clone(),
        settings.compliance.keywords(),
    ));

    let verifier = Arc::new(
        WebhookVerifier::new(&settings.provider.public_key, clock)
            .map_err(io::Error::other)?,
    );

    let state = web::Data::new(HttpState::new(send, reconciler, verifier));
    let port = settings.http.port;
    info!(port, "starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(send_sms)
            .service(send_campaign)
            .service(telnyx_webhook)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
