//! Server configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is read first (see `main`), so
//! every setting below can live there during development.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP/WebSocket port. Default: `5000`
//! - `PARLEY_BIND_ADDR`: Listen address. Default: `0.0.0.0`
//! - `PARLEY_ALLOWED_ORIGINS`: Comma separated CORS origins. Default: `http://localhost:3000`
//! - `PARLEY_DB_PATH`: libSQL database file. Default: in-memory
//! - `PARLEY_STORE_TIMEOUT_MS`: Timeout for each message store call. Default: `2000`
//! - `PARLEY_OUTBOUND_BUFFER`: Per-connection outbound queue size. Default: `256`
//! - `PARLEY_NOTIFY_SUPERSEDED`: Tell a connection when its user binds elsewhere. Default: `true`
//! - `PARLEY_STALE_SWEEP_SECS`: Interval for sweeping dead bindings, `0` disables. Default: `60`

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use parley_relay::lifecycle::DEFAULT_OUTBOUND_BUFFER;
use parley_relay::LifecycleConfig;
use thiserror::Error;
use tracing::info;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_STALE_SWEEP_SECS: u64 = 60;

/// Configuration errors, reported at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    pub listen_addr: SocketAddr,
    /// Origins allowed by CORS, without trailing slashes
    pub allowed_origins: Vec<String>,
    /// libSQL database path; None for in-memory
    pub db_path: Option<String>,
    /// Upper bound on each message store call made while relaying
    pub store_timeout: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Whether displaced connections receive a `superseded` event
    pub notify_superseded: bool,
    /// How often to sweep bindings whose connection died; None disables
    pub stale_sweep_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            allowed_origins: vec![DEFAULT_ORIGIN.to_string()],
            db_path: None,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            notify_superseded: true,
            stale_sweep_interval: Some(Duration::from_secs(DEFAULT_STALE_SWEEP_SECS)),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ip: IpAddr = parse_or(get("PARLEY_BIND_ADDR"), "PARLEY_BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?;
        let port: u16 = parse_or(get("PORT"), "PORT", DEFAULT_PORT)?;

        let allowed_origins = match get("PARLEY_ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw),
            None => vec![DEFAULT_ORIGIN.to_string()],
        };

        let store_timeout_ms: u64 = parse_or(
            get("PARLEY_STORE_TIMEOUT_MS"),
            "PARLEY_STORE_TIMEOUT_MS",
            DEFAULT_STORE_TIMEOUT_MS,
        )?;
        if store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PARLEY_STORE_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let outbound_buffer: usize = parse_or(
            get("PARLEY_OUTBOUND_BUFFER"),
            "PARLEY_OUTBOUND_BUFFER",
            DEFAULT_OUTBOUND_BUFFER,
        )?;
        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PARLEY_OUTBOUND_BUFFER",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let notify_superseded = match get("PARLEY_NOTIFY_SUPERSEDED") {
            Some(raw) => parse_bool("PARLEY_NOTIFY_SUPERSEDED", &raw)?,
            None => true,
        };

        let sweep_secs: u64 = parse_or(
            get("PARLEY_STALE_SWEEP_SECS"),
            "PARLEY_STALE_SWEEP_SECS",
            DEFAULT_STALE_SWEEP_SECS,
        )?;

        Ok(Self {
            listen_addr: SocketAddr::new(ip, port),
            allowed_origins,
            db_path: get("PARLEY_DB_PATH"),
            store_timeout: Duration::from_millis(store_timeout_ms),
            outbound_buffer,
            notify_superseded,
            stale_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }

    /// Lifecycle settings derived from this configuration.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            outbound_buffer: self.outbound_buffer,
            notify_superseded: self.notify_superseded,
        }
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Listen address: {}", self.listen_addr);
        info!("Allowed origins: {}", self.allowed_origins.join(", "));
        match &self.db_path {
            Some(path) => info!("Message store: libSQL file at {}", path),
            None => info!("Message store: in-memory (development mode)"),
        }
        info!("Store timeout: {:?}", self.store_timeout);
        info!("Outbound buffer: {}", self.outbound_buffer);
        info!("Superseded notifications: {}", self.notify_superseded);
        match self.stale_sweep_interval {
            Some(interval) => info!("Stale binding sweep: every {:?}", interval),
            None => info!("Stale binding sweep: disabled"),
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value,
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Split a comma separated origin list. Browsers send origins without a
/// trailing slash, so one configured with a slash would never match.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
