//! Gateway Configuration
//!
//! All tuning comes from the environment (with `.env` support via
//! dotenvy in the binary). `DERIV_APP_ID` is the only required
//! variable; everything else has a production default.

use std::time::Duration;

use crate::domain::tenant::TenantKey;
use crate::infrastructure::deriv::connection::ConnectionSettings;
use crate::infrastructure::deriv::keepalive::KeepaliveConfig;
use crate::infrastructure::deriv::reconnect::ReconnectConfig;
use crate::infrastructure::pool::PoolSettings;

/// Default websocket endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";

/// Configuration failure at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// A variable is set but empty.
    #[error("environment variable is empty: {0}")]
    EmptyValue(&'static str),

    /// A variable could not be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Deriv application id, appended to the endpoint URL.
    pub app_id: String,
    /// Websocket endpoint, without the app id query parameter.
    pub endpoint: String,
    /// API token for the default tenant, when present.
    pub api_token: Option<String>,
    /// Per-request response deadline.
    pub request_timeout: Duration,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Consecutive reconnect failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Per-symbol tick history capacity.
    pub history_capacity: usize,
    /// Maximum simultaneous pooled connections.
    pub max_connections: usize,
}

impl GatewayConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `DERIV_APP_ID` is missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same contract as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let app_id = required(&lookup, "DERIV_APP_ID")?;
        let endpoint =
            lookup("DERIV_WS_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let api_token = lookup("DERIV_API_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            app_id,
            endpoint,
            api_token,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "GATEWAY_REQUEST_TIMEOUT_SECS",
                10,
            )?),
            ping_interval: Duration::from_secs(parse_or(
                &lookup,
                "GATEWAY_PING_INTERVAL_SECS",
                30,
            )?),
            max_reconnect_attempts: parse_or(&lookup, "GATEWAY_MAX_RECONNECT_ATTEMPTS", 5)?,
            history_capacity: parse_or(&lookup, "GATEWAY_HISTORY_CAPACITY", 1000)?,
            max_connections: parse_or(&lookup, "GATEWAY_MAX_CONNECTIONS", 8)?,
        })
    }

    /// The full websocket URL, app id included.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }

    /// The tenant key for the configured default credential.
    #[must_use]
    pub fn tenant(&self) -> TenantKey {
        TenantKey::from_token(self.api_token.clone())
    }

    /// Connection tuning derived from this configuration.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            url: self.websocket_url(),
            request_timeout: self.request_timeout,
            reconnect: ReconnectConfig {
                max_attempts: self.max_reconnect_attempts,
                ..ReconnectConfig::default()
            },
            keepalive: KeepaliveConfig {
                interval: self.ping_interval,
                ..KeepaliveConfig::default()
            },
            history_capacity: self.history_capacity,
        }
    }

    /// Pool sizing derived from this configuration.
    #[must_use]
    pub const fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
        }
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        None => Err(ConfigError::MissingEnvVar(name)),
        Some(v) if v.is_empty() => Err(ConfigError::EmptyValue(name)),
        Some(v) => Ok(v),
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}
