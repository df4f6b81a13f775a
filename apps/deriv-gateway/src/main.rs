//! Deriv Gateway Binary
//!
//! Starts the trading connection gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin deriv-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DERIV_APP_ID`: Deriv application id
//!
//! ## Optional
//! - `DERIV_API_TOKEN`: API token for the default tenant (anonymous when unset)
//! - `DERIV_WS_ENDPOINT`: Websocket endpoint (default: wss://ws.derivws.com/websockets/v3)
//! - `GATEWAY_REQUEST_TIMEOUT_SECS`: Per-request deadline (default: 10)
//! - `GATEWAY_PING_INTERVAL_SECS`: Keepalive interval (default: 30)
//! - `GATEWAY_MAX_RECONNECT_ATTEMPTS`: Backoff budget (default: 5)
//! - `GATEWAY_HISTORY_CAPACITY`: Per-symbol tick history (default: 1000)
//! - `GATEWAY_MAX_CONNECTIONS`: Pool size (default: 8)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use deriv_gateway::{GatewayConfig, PoolService, WsConnector};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();
    init_tracing();

    tracing::info!("Starting Deriv Gateway");

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let pool = Arc::new(PoolService::new(
        config.pool_settings(),
        config.connection_settings(),
        Arc::new(WsConnector::new()),
    ));

    let connection = pool.get_or_create(&config.tenant()).await?;
    tracing::info!(state = ?connection.state(), "gateway connection ready");

    await_shutdown().await;

    pool.shutdown().await;
    tracing::info!("Gateway stopped");
    Ok(())
}

/// Initialize tracing with an env-filter, defaulting to `info`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration. Never logs the token.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        app_id = %config.app_id,
        endpoint = %config.endpoint,
        tenant = %config.tenant(),
        request_timeout_secs = config.request_timeout.as_secs(),
        ping_interval_secs = config.ping_interval.as_secs(),
        max_connections = config.max_connections,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
