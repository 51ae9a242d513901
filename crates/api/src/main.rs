//! Storefront entry point.

use std::sync::Arc;
use std::time::Duration;

use api::Backends;
use api::config::Config;
use event_store::PostgresEventStore;
use inventory::PostgresInventoryLedger;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// PostgreSQL for the order journal and the ledger when `DATABASE_URL` is
/// set; in-memory otherwise. The channel is always in-process.
async fn backends(config: &Config) -> Result<Backends, Box<dyn std::error::Error>> {
    let mut backends = Backends::in_memory();

    if let Some(url) = &config.database_url {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;

        let store = PostgresEventStore::new(pool.clone());
        store.run_migrations().await?;

        backends.store = Arc::new(store);
        backends.ledger = Arc::new(PostgresInventoryLedger::new(pool));
        tracing::info!("using PostgreSQL event store and ledger");
    } else {
        tracing::info!("using in-memory event store and ledger");
    }

    backends.seed(&config.seed_products).await?;
    Ok(backends)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire backends and start the worker pools
    let backends = backends(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = api::spawn_workers(&backends, &config, shutdown_rx);

    // 4. Build the application
    let state = api::AppState::new(&backends, &config);
    let app = api::create_app(state, metrics_handle);

    // 5. Serve until a shutdown signal arrives
    let addr = config.addr();
    tracing::info!(%addr, "starting storefront");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Let workers finish the batch in hand
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::error!(error = %err, "worker task failed");
        }
    }

    tracing::info!("storefront shut down gracefully");
    Ok(())
}
