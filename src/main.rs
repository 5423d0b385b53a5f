//! Keymeter
//!
//! API-key authorization and rate limiting for a proxy gateway, plus the
//! usage metering pipeline fed by the proxy's access-log stream.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

mod api;
mod auth;
mod billing;
mod config;
mod db;
mod error;
mod metering;
mod quota;

#[cfg(test)]
mod testing;

use crate::auth::{AuthEngine, CredentialHasher};
use crate::billing::{BillingAggregator, LogOnlyProvider, MeterEventsClient, PaymentProvider};
use crate::config::Settings;
use crate::db::{CredentialRepository, DbPool, UsageRepository};
use crate::metering::{BatchBuffer, FlushScheduler, Ingestor, MeteringPipeline, PipelineStats};
use crate::quota::{MemoryCounterStore, RedisCounterStore, WindowCounterStore};

const COUNTER_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across all handlers
pub struct AppState {
    pub auth: AuthEngine,
    pub ingestor: Ingestor,
    pub stats: Arc<PipelineStats>,
    /// Cancelled on shutdown; every open access-log stream holds a child token
    pub ingest_shutdown: CancellationToken,
    pub started_at: Instant,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keymeter=info".parse()?)
                .add_directive("actix_web=info".parse()?)
        )
        .json()
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);

    info!(
        "Starting Keymeter v{} on {}",
        env!("CARGO_PKG_VERSION"),
        bind_addr
    );

    // The credential store is authoritative; refuse to start without it
    if settings.database.url.is_empty() {
        anyhow::bail!("DATABASE_URL is not configured");
    }
    let pool = DbPool::new(&settings.database.url, settings.database.max_connections)
        .context("Failed to create database pool")?;
    pool.test_connection().await.context("Database connection test failed")?;

    let hasher = CredentialHasher::new(&settings.auth.salt, settings.auth.iterations);
    let credentials = CredentialRepository::new(pool.clone(), hasher.clone());
    let usage = UsageRepository::new(pool.clone());

    let background = CancellationToken::new();
    let counters: Arc<dyn WindowCounterStore> = if settings.redis.url.is_empty() {
        warn!("No REDIS_URL configured, quota counters are process-local");
        let store = Arc::new(MemoryCounterStore::new());
        spawn_counter_purge(store.clone(), background.clone());
        store
    } else {
        let store = RedisCounterStore::connect(&settings.redis.url)
            .await
            .context("Failed to connect to Redis")?;
        store.ping().await.context("Redis ping failed")?;
        Arc::new(store)
    };

    let provider: Arc<dyn PaymentProvider> = match MeterEventsClient::from_settings(&settings.billing)
        .context("Failed to build payment provider client")?
    {
        Some(client) => {
            info!(event_name = %settings.billing.provider_event_name, "Usage reporting enabled");
            Arc::new(client)
        }
        None => {
            info!("No payment provider key configured, usage reporting disabled");
            Arc::new(LogOnlyProvider)
        }
    };

    let stats = Arc::new(PipelineStats::new());
    let aggregator = BillingAggregator::new(
        Arc::new(usage.clone()),
        Arc::new(credentials.clone()),
        provider,
        stats.clone(),
    )
    .with_pricing(settings.billing.unit_price_cents, settings.billing.cadence())
    .with_timeouts(settings.database.write_timeout(), settings.billing.provider_timeout());

    let pipeline = Arc::new(MeteringPipeline::new(
        BatchBuffer::new(settings.metering.batch_size),
        aggregator,
        stats.clone(),
    ));
    let scheduler = FlushScheduler::spawn(pipeline.clone(), settings.metering.flush_interval());

    let auth = AuthEngine::new(
        Arc::new(credentials.clone()),
        counters,
        hasher,
        settings.auth.store_timeout(),
    )
    .with_key_prefix(settings.redis.key_prefix.clone());

    let ingest_shutdown = CancellationToken::new();
    let app_state = web::Data::new(AppState {
        auth,
        ingestor: Ingestor::new(pipeline),
        stats,
        ingest_shutdown: ingest_shutdown.clone(),
        started_at: Instant::now(),
    });
    let credentials_data = web::Data::new(credentials);
    let usage_data = web::Data::new(usage);

    let workers = settings.server.workers.unwrap_or_else(|| num_cpus::get() * 2);

    // Configure and start HTTP server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(credentials_data.clone())
            .app_data(usage_data.clone())
            .wrap(TracingLogger::default())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "keymeter"))
                    .add(("X-Version", env!("CARGO_PKG_VERSION")))
            )
            .configure(api::configure_routes)
    })
    .workers(workers)
    .shutdown_timeout(settings.server.shutdown_timeout_secs)
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    actix_rt::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, closing access-log streams");
        // Streams end first so their handlers flush and respond before the
        // server stops accepting work
        ingest_shutdown.cancel();
        server_handle.stop(true).await;
    });

    server.await.context("HTTP server failed")?;

    scheduler.shutdown().await;
    background.cancel();
    pool.close();
    info!("Keymeter stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Drop expired process-local counters so idle credentials do not accumulate
fn spawn_counter_purge(store: Arc<MemoryCounterStore>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(COUNTER_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = store.len(), "Purged expired quota counters");
                    }
                }
            }
        }
    });
}
