//! API server entry point.

use std::sync::Arc;

use api::Backends;
use api::config::{Config, LogFormat};
use checkout::{InMemoryNotificationService, InMemoryPaymentProvider};
use sqlx::postgres::PgPoolOptions;
use store::{PostgresCartStore, PostgresOrderStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn backends(config: &Config) -> Backends {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, carts and orders are kept in memory");
        return Backends::in_memory(api::demo_catalog());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    store::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    Backends {
        cart_store: Arc::new(PostgresCartStore::new(pool.clone())),
        order_store: Arc::new(PostgresOrderStore::new(pool)),
        products: Arc::new(api::demo_catalog()),
        payments: Arc::new(InMemoryPaymentProvider::new()),
        notifications: Arc::new(InMemoryNotificationService::new()),
        name: "postgres",
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect stores and build application state
    let backends = backends(&config).await;
    let state = api::build_state(&config, backends);

    // 4. Build the application
    let limiter = api::rate_limit::owner_rate_limiter(config.rate_limit_per_minute)
        .expect("RATE_LIMIT_PER_MINUTE must be positive");
    let app = api::create_app(state, metrics_handle, limiter);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, currency = %config.currency, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
