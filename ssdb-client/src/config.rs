//! # Client Configuration
//!
//! Connection, pool and client settings. Every struct has working defaults
//! and can be loaded from TOML; durations are written in milliseconds.
//!
//! ```toml
//! [connection]
//! host = "127.0.0.1"
//! port = 8888
//! read_timeout_ms = 500
//! decode_responses = true
//!
//! [pool]
//! kind = "blocking"
//! max_connections = 4
//! timeout_ms = 2000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ssdb_common::{EncodingErrors, TextCodec, TextEncoding};

use crate::error::{Error, Result};

/// Default upper bound for the non-blocking pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1 << 31;
/// Default upper bound for the blocking pool.
pub const DEFAULT_BLOCKING_MAX_CONNECTIONS: usize = 50;
/// Default wait for a free slot in the blocking pool.
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(20);
/// Default number of bytes requested per socket read.
pub const DEFAULT_SOCKET_READ_SIZE: usize = 65536;

/// TCP keepalive tuning, applied only when `socket_keepalive` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveOptions {
    /// Idle time before the first probe (`TCP_KEEPIDLE`).
    #[serde(rename = "idle_ms", with = "millis")]
    pub idle: Option<Duration>,
    /// Interval between probes (`TCP_KEEPINTVL`).
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Option<Duration>,
    /// Failed probes before the connection is dropped (`TCP_KEEPCNT`).
    pub count: Option<u32>,
}

/// Settings for a single TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Falls back to `read_timeout` when unset.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "write_timeout_ms", with = "millis")]
    pub write_timeout: Option<Duration>,
    pub tcp_nodelay: bool,
    pub socket_keepalive: bool,
    pub keepalive: KeepaliveOptions,
    #[serde(with = "as_string")]
    pub encoding: TextEncoding,
    #[serde(with = "as_string")]
    pub encoding_errors: EncodingErrors,
    /// Return payload fields as text instead of raw bytes.
    pub decode_responses: bool,
    pub socket_read_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 8888,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            tcp_nodelay: true,
            socket_keepalive: false,
            keepalive: KeepaliveOptions::default(),
            encoding: TextEncoding::Utf8,
            encoding_errors: EncodingErrors::Strict,
            decode_responses: false,
            socket_read_size: DEFAULT_SOCKET_READ_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            ..ConnectionConfig::default()
        }
    }

    pub fn text_codec(&self) -> TextCodec {
        TextCodec::new(self.encoding, self.encoding_errors)
    }

    pub fn effective_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.or(self.read_timeout)
    }

    /// `host=H,port=P`, used in `Display` output.
    pub fn describe(&self) -> String {
        format!("host={},port={}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("\"host\" must not be empty".to_string()));
        }
        if self.socket_read_size == 0 {
            return Err(Error::Config(
                "\"socket_read_size\" must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Fails immediately when every slot is taken.
    #[default]
    NonBlocking,
    /// Waits up to `timeout` for a slot.
    Blocking,
}

/// Pool sizing and wait policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub kind: PoolKind,
    /// Defaults depend on `kind`; zero is rejected.
    pub max_connections: Option<usize>,
    /// Blocking pool only; `None` waits forever.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            kind: PoolKind::NonBlocking,
            max_connections: None,
            timeout: Some(DEFAULT_POOL_TIMEOUT),
        }
    }
}

impl PoolConfig {
    pub fn non_blocking(max_connections: usize) -> Self {
        PoolConfig {
            kind: PoolKind::NonBlocking,
            max_connections: Some(max_connections),
            timeout: None,
        }
    }

    pub fn blocking(max_connections: usize, timeout: Option<Duration>) -> Self {
        PoolConfig {
            kind: PoolKind::Blocking,
            max_connections: Some(max_connections),
            timeout,
        }
    }

    pub fn effective_max_connections(&self) -> usize {
        match (self.max_connections, self.kind) {
            (Some(max), _) => max,
            (None, PoolKind::NonBlocking) => DEFAULT_MAX_CONNECTIONS,
            (None, PoolKind::Blocking) => DEFAULT_BLOCKING_MAX_CONNECTIONS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == Some(0) {
            return Err(Error::Config(
                "\"max_connections\" must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub pool: PoolConfig,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            connection: ConnectionConfig::new(host, port),
            pool: PoolConfig::default(),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("failed to read {}: {}", path.display(), err)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.pool.validate()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

mod as_string {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}
