//! Billing inbox server.
//!
//! Loads configuration, connects PostgreSQL (and Redis when configured),
//! starts the retry scheduler and serves the billing API until SIGINT or
//! SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use billing_inbox::adapters::http::{
    billing_router, BillingAppState, EdgeGuardState, IpAllowlist, TrustedProxies,
};
use billing_inbox::adapters::{
    InMemoryRateLimiter, PostgresInboxStore, RedisRateLimiter, SystemClock,
};
use billing_inbox::application::{
    IngestionCoordinator, LifecycleJobs, RetryScheduler, RetrySchedulerConfig,
};
use billing_inbox::config::{AppConfig, LogFormat, ServerConfig};
use billing_inbox::ports::{Clock, InboxStore, RateLimiter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.server);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Server terminated with error");
        std::process::exit(1);
    }
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    match server.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(config: AppConfig) -> Result<(), BoxError> {
    let pool = config.database.pool_options().connect(&config.database.url).await?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn InboxStore> = Arc::new(PostgresInboxStore::new(pool));
    let verifier = Arc::new(config.webhook.build_verifier()?);

    let coordinator = Arc::new(IngestionCoordinator::new(
        store.clone(),
        clock.clone(),
        config.retry.retry_policy(),
    ));
    let scheduler = Arc::new(RetryScheduler::with_config(
        coordinator.clone(),
        store.clone(),
        clock.clone(),
        RetrySchedulerConfig::default()
            .with_poll_interval(config.retry.poll_interval())
            .with_batch_size(config.retry.batch_size),
    ));
    let lifecycle = Arc::new(LifecycleJobs::new(
        store.clone(),
        clock.clone(),
        config.lifecycle.grace_period_secs(),
    ));

    let limiter = build_rate_limiter(&config, clock.clone()).await?;
    let guard = EdgeGuardState::new(IpAllowlist::parse(&config.webhook.ip_allowlist), limiter)
        .with_trusted_proxies(TrustedProxies::parse(&config.webhook.trusted_proxies)?);

    let state = BillingAppState {
        store,
        clock,
        verifier,
        coordinator,
        scheduler: scheduler.clone(),
        lifecycle,
    };

    let app = billing_router(guard)
        .with_state(state)
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(TraceLayer::new_for_http());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retry_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, environment = ?config.server.environment, "Billing inbox listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;

    retry_task.await?;
    info!("Billing inbox stopped");
    Ok(())
}

/// Redis-backed limits when Redis is configured, per-process counters otherwise.
async fn build_rate_limiter(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimiter>, BoxError> {
    let per_minute = config.webhook.rate_limit_per_minute;
    match &config.redis {
        Some(redis_config) => {
            let client = redis::Client::open(redis_config.url.as_str())?;
            let conn = tokio::time::timeout(
                redis_config.timeout(),
                client.get_multiplexed_tokio_connection(),
            )
            .await??;
            info!("Webhook rate limits shared through Redis");
            Ok(Arc::new(RedisRateLimiter::new(conn, per_minute)))
        }
        None => {
            warn!("No Redis configured; webhook rate limits are per instance");
            Ok(Arc::new(InMemoryRateLimiter::new(per_minute, clock)))
        }
    }
}

/// Resolves on SIGINT or SIGTERM and tells background tasks to stop.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(true);
}
