//! storelink - keyCRM / Shopify / eSputnik bridge.
//!
//! # Startup
//!
//! 1. Configuration from the environment (`.env` honoured)
//! 2. Sentry, then tracing (JSON when `LOG_FORMAT=json`)
//! 3. `PostgreSQL` pool; migrations are applied out of band
//! 4. API clients, stores, the status fanout engine
//! 5. One worker pool per job queue
//! 6. HTTP server until SIGINT/SIGTERM, then workers drain

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use axum::http::{Request, Response};
use sentry::integrations::tracing as sentry_tracing;
use tokio::sync::watch;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storelink_server::config::AppConfig;
use storelink_server::db::{
    self, FailedJobStore, JobStore, OrderMappingStore, PgFailedJobStore, PgJobStore,
    PgOrderMappingStore, PgPriceStore, PriceStore,
};
use storelink_server::esputnik::{EsputnikClient, OrderEvents};
use storelink_server::fanout::FanoutEngine;
use storelink_server::keycrm::KeycrmClient;
use storelink_server::pricing::PriceTracker;
use storelink_server::queue::{self, Worker};
use storelink_server::routes;
use storelink_server::shopify::ShopifyClient;
use storelink_server::state::{AppState, Queues, WebhookSecrets};
use storelink_server::workers::{OrderEventHandler, OrderSyncHandler, PriceTrackingHandler};

/// Initialize Sentry and return the guard that must be kept alive.
fn init_sentry(config: &AppConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            attach_stacktrace: true,
            // Webhook payloads carry customer contact details
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Warnings and errors become Sentry events, info and debug breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storelink_server=info,tower_http=debug".into());

    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    let _sentry_guard = init_sentry(&config);
    init_tracing(config.json_logs);

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Clients
    let shopify = Arc::new(ShopifyClient::new(&config.shopify)?);
    let keycrm = Arc::new(KeycrmClient::new(&config.keycrm)?);
    let esputnik: Arc<dyn OrderEvents> = Arc::new(EsputnikClient::new(&config.esputnik)?);

    // Stores
    let mappings: Arc<dyn OrderMappingStore> = Arc::new(PgOrderMappingStore::new(pool.clone()));
    let prices: Arc<dyn PriceStore> = Arc::new(PgPriceStore::new(pool.clone()));
    let dead_letters: Arc<dyn FailedJobStore> = Arc::new(PgFailedJobStore::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));

    let fanout = FanoutEngine::new(mappings.clone(), shopify, esputnik.clone());

    // Queues and workers
    let options = config.queue.job_options();
    let concurrency = config.queue.concurrency;
    let (orders_queue, orders_rx) = queue::channel(queue::SHOPIFY_ORDERS, options, jobs.clone());
    let (events_queue, events_rx) = queue::channel(queue::ESPUTNIK_ORDERS, options, jobs.clone());
    let (prices_queue, prices_rx) = queue::channel(queue::PRICE_TRACKING, options, jobs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = vec![
        Worker::new(
            orders_queue.clone(),
            orders_rx,
            Arc::new(OrderSyncHandler::new(
                mappings,
                keycrm,
                config.keycrm.source_id,
            )),
            dead_letters.clone(),
            concurrency,
        )
        .spawn(shutdown_rx.clone()),
        Worker::new(
            events_queue.clone(),
            events_rx,
            Arc::new(OrderEventHandler::new(esputnik.clone())),
            dead_letters.clone(),
            concurrency,
        )
        .spawn(shutdown_rx.clone()),
        Worker::new(
            prices_queue.clone(),
            prices_rx,
            Arc::new(PriceTrackingHandler::new(PriceTracker::new(
                prices.clone(),
                esputnik,
            ))),
            dead_letters,
            concurrency,
        )
        .spawn(shutdown_rx),
    ];

    let addr = config.socket_addr();
    let state = AppState::new(
        pool,
        WebhookSecrets {
            shopify: config.shopify.webhook_secret,
            keycrm: config.keycrm.webhook_token,
        },
        fanout,
        Queues {
            orders: orders_queue,
            order_events: events_queue,
            prices: prices_queue,
        },
        prices,
    );

    let app = routes::routes()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &Response<_>, latency: std::time::Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("storelink listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP is drained; let in-flight jobs finish
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Worker task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
