use std::time::Duration;

use crate::error::TransportSetupError;

pub const DEFAULT_HOST: &str = "localhost:50051";

/// Message compression applied to requests and accepted on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
}

/// HTTP/2 keep-alive pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Interval between pings.
    pub interval: Duration,
    /// How long to wait for a ping acknowledgement before closing the connection.
    pub timeout: Duration,
    /// Keep pinging while no calls are in flight.
    pub while_idle: bool,
}

/// Connection settings for the gRPC transport.
///
/// # Example
///
/// ```ignore
/// let config = TransportConfig::builder()
///     .host("api.example.com:443")
///     .compression(Compression::Gzip)
///     .response_size_limit(8 * 1024 * 1024)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct TransportConfig {
    /// `host:port` of the server.
    #[builder(into, default = DEFAULT_HOST.to_string())]
    pub host: String,

    /// Use plain-text HTTP/2 instead of TLS.
    #[builder(default)]
    pub insecure: bool,

    pub compression: Option<Compression>,

    /// Largest response message accepted, in bytes.
    pub response_size_limit: Option<usize>,

    pub keep_alive: Option<KeepAlive>,

    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportConfig {
    /// Read settings from `GRPC_*` environment variables, falling back to defaults.
    ///
    /// - `GRPC_HOST`: `host:port`
    /// - `GRPC_INSECURE`: `1`/`true` for plain-text HTTP/2
    /// - `GRPC_COMPRESSION`: `gzip` or `none`
    /// - `GRPC_RESPONSE_SIZE_LIMIT`: bytes
    /// - `GRPC_KEEPALIVE_SECS`, `GRPC_KEEPALIVE_TIMEOUT_SECS`
    /// - `GRPC_CONNECT_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, TransportSetupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, TransportSetupError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("GRPC_HOST") {
            config.host = host;
        }
        if let Some(value) = lookup("GRPC_INSECURE") {
            config.insecure = parse_bool("GRPC_INSECURE", &value)?;
        }
        if let Some(value) = lookup("GRPC_COMPRESSION") {
            config.compression = match value.to_ascii_lowercase().as_str() {
                "gzip" => Some(Compression::Gzip),
                "" | "none" => None,
                _ => return Err(invalid("GRPC_COMPRESSION", value)),
            };
        }
        if let Some(value) = lookup("GRPC_RESPONSE_SIZE_LIMIT") {
            let limit = value
                .parse()
                .map_err(|_| invalid("GRPC_RESPONSE_SIZE_LIMIT", value))?;
            config.response_size_limit = Some(limit);
        }
        if let Some(value) = lookup("GRPC_KEEPALIVE_SECS") {
            let interval = parse_secs("GRPC_KEEPALIVE_SECS", value)?;
            let timeout = match lookup("GRPC_KEEPALIVE_TIMEOUT_SECS") {
                Some(value) => parse_secs("GRPC_KEEPALIVE_TIMEOUT_SECS", value)?,
                None => Duration::from_secs(20),
            };
            config.keep_alive = Some(KeepAlive {
                interval,
                timeout,
                while_idle: true,
            });
        }
        if let Some(value) = lookup("GRPC_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Some(parse_secs("GRPC_CONNECT_TIMEOUT_SECS", value)?);
        }

        Ok(config)
    }

    /// The endpoint URI for this configuration.
    pub fn uri(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{}", self.host)
    }
}

fn invalid(name: &'static str, value: String) -> TransportSetupError {
    TransportSetupError::InvalidSetting { name, value }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, TransportSetupError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(invalid(name, value.to_string())),
    }
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, TransportSetupError> {
    value
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| invalid(name, value))
}
