use anyhow::Result;
use api::{logging, AppState, RateLimiter};
use blockchain::{LedgerGateway, SolanaClient};
use database::{create_pool, run_migrations, ArchiveStore, InMemoryArchiveStore, PgArchiveStore};
use keystore::{FileKeyStore, KeyStore};
use monitoring::{ExpiredWalletReaper, MonitorContext, MonitorRegistry};
use notification::{HttpWebhookDispatcher, WebhookDispatcher};
use payment::PaymentService;
use shared::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RATE_LIMIT_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(600);
const SESSION_RETENTION_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    logging::init(config.logging.format);

    tracing::info!("Starting Solana payment forwarder");
    tracing::info!(
        "Forwarding to {} (minimum {} SOL, slippage {}, ignore below {})",
        config.forwarder.forward_address,
        config.forwarder.min_forward,
        config.forwarder.slippage_tolerance,
        config.forwarder.ignore_threshold
    );
    if config.forwarder.sweep_simulate {
        tracing::info!("Sweeps are simulated before submission");
    }

    // Initialize Solana client
    let ledger: Arc<dyn LedgerGateway> = Arc::new(SolanaClient::connect(&config.solana).await?);
    tracing::info!("Solana client initialized");

    let keystore: Arc<dyn KeyStore> = Arc::new(FileKeyStore::open(&config.keystore, ledger.clone()).await?);
    tracing::info!("Key store opened at {}", config.keystore.dir.display());

    let archive: Arc<dyn ArchiveStore> = match &config.database.url {
        Some(url) => {
            let db_pool = create_pool(url, config.database.max_connections).await?;
            tracing::info!("Database connection pool created");

            // Run migrations (skip if SKIP_MIGRATIONS=true)
            if std::env::var("SKIP_MIGRATIONS").unwrap_or_default() != "true" {
                run_migrations(&db_pool).await?;
            } else {
                tracing::info!("Skipping database migrations (SKIP_MIGRATIONS=true)");
            }
            Arc::new(PgArchiveStore::new(db_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, archiving transactions in memory only");
            Arc::new(InMemoryArchiveStore::new())
        }
    };

    let webhooks: Arc<dyn WebhookDispatcher> = Arc::new(HttpWebhookDispatcher::new(&config.webhook)?);

    let ctx = Arc::new(MonitorContext::new(
        &config.forwarder,
        ledger.clone(),
        keystore.clone(),
        archive,
        webhooks,
    ));
    let registry = MonitorRegistry::new(ctx);

    let shutdown = CancellationToken::new();
    let pruner = tokio::spawn(registry.clone().run_pruner(
        SESSION_PRUNE_INTERVAL,
        chrono::Duration::hours(SESSION_RETENTION_HOURS),
        shutdown.clone(),
    ));
    let reaper = if config.reaper.enabled {
        let reaper = ExpiredWalletReaper::new(registry.clone(), config.forwarder.payment_window);
        tracing::info!("Expired wallet reaper running every {:?}", config.reaper.interval);
        Some(tokio::spawn(reaper.run(config.reaper.interval, shutdown.clone())))
    } else {
        tracing::info!("Expired wallet reaper disabled");
        None
    };

    let payments = Arc::new(PaymentService::new(
        &config.forwarder,
        config.server.allow_local_callbacks,
        keystore,
        registry.clone(),
    ));

    let app_state = Arc::new(AppState::new(
        payments,
        ledger,
        RateLimiter::per_minute(config.rate_limit.requests_per_minute),
    ));

    let purge_state = app_state.clone();
    let purge_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = ticker.tick() => purge_state.rate_limiter.purge_expired(),
            }
        }
    });

    let app = api::routes::create_router(app_state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, cancelling {} active monitors", registry.active_count());
    shutdown.cancel();
    registry.shutdown().await;
    let _ = pruner.await;
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
