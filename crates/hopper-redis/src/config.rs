//! Redis connection and key layout.

use std::time::Duration;

use hopper_core::ConfigError;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

/// RedisConfig は接続先とキー名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port`
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    /// Sorted set holding waiting task ids.
    pub queue_key: String,
    /// Hash holding task records.
    pub tasks_key: String,
    /// Pub/sub channel carrying wake-up hints.
    pub notify_channel: String,
    pub connect_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            queue_key: "hopper:queue".to_string(),
            tasks_key: "hopper:tasks".to_string(),
            notify_channel: "hopper:notify".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl RedisConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Prefix all three key names, e.g. to isolate test runs.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.queue_key = format!("{namespace}:queue");
        self.tasks_key = format!("{namespace}:tasks");
        self.notify_channel = format!("{namespace}:notify");
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Split `addr` into host and port. IPv6 hosts may be bracketed.
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        let invalid = || ConfigError::InvalidAddr(self.addr.clone());
        let (host, port) = self.addr.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok((host.to_string(), port))
    }

    /// Connection parameters passed to the client as-is, so credentials need
    /// no URL escaping.
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        let (host, port) = self.host_port()?;
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..RedisConnectionInfo::default()
            },
        })
    }

    /// Endpoint description for logs; never contains the password.
    pub fn redacted_url(&self) -> String {
        let auth = if self.password.is_some() { ":***@" } else { "" };
        format!("redis://{auth}{}/{}", self.addr, self.db)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("addr", &self.addr),
            ("queue_key", &self.queue_key),
            ("tasks_key", &self.tasks_key),
            ("notify_channel", &self.notify_channel),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyName(name));
            }
        }
        self.host_port()?;
        Ok(())
    }
}
