use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gas_alert_service::{
    api::{self, AppState},
    clock::SystemClock,
    config::Config,
    db::{self, MemoryStore, PgStore},
    notify::{FcmClient, LogDispatcher, NotificationDispatcher},
    pipeline::PipelineSettings,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent, env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        threshold = config.gas_threshold,
        throttle_secs = config.throttle_window.as_secs(),
        "Configuration loaded"
    );

    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.fcm {
        Some(fcm) => {
            info!(project_id = %fcm.project_id, "FCM push delivery enabled");
            Arc::new(FcmClient::new(fcm, config.io_timeout)?)
        }
        None => {
            warn!("FCM_PROJECT_ID/FCM_ACCESS_TOKEN not set; notifications will only be logged");
            Arc::new(LogDispatcher)
        }
    };

    let settings = PipelineSettings {
        threshold: config.gas_threshold,
        throttle_window: config.throttle_window,
        io_timeout: config.io_timeout,
    };
    let clock = Arc::new(SystemClock);

    let state = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            AppState::new(
                Arc::new(PgStore::new(pool)),
                dispatcher,
                clock,
                settings,
                config.fanout_concurrency,
            )
        }
        None => {
            warn!("DATABASE_URL not set; readings and alerts are kept in memory only");
            AppState::new(
                Arc::new(MemoryStore::new()),
                dispatcher,
                clock,
                settings,
                config.fanout_concurrency,
            )
        }
    };

    // A failed rebuild only means the first alert per device after restart
    // is not throttled.
    if let Err(e) = state
        .pipeline
        .throttle()
        .rebuild_from(state.alerts.as_ref())
        .await
    {
        warn!(error = %e, "Could not rebuild alert throttle from history");
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
