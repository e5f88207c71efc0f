use boardflow_flow::FlowRunner;
use boardflow_remote::SshConnector;
use boardflow_server::{
    app::{self, AppState},
    config::ServerConfig,
    db::{DeviceRepository, FlowRepository},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    // Runs do not survive a restart
    let flows = Arc::new(FlowRepository::new(db_pool.clone()));
    match flows.reset_stale_runs().await {
        Ok(count) if count > 0 => {
            tracing::info!(reset_runs = count, "Marked interrupted runs as failed");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to reset interrupted runs");
        }
    }

    let runner = FlowRunner::new(
        flows,
        Arc::new(DeviceRepository::new(db_pool)),
        Arc::new(SshConnector::new(config.ssh)),
        config.engine,
    );
    let app = app::router(AppState::new(runner));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
