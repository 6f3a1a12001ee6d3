use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::user::{ConfigError, ConfigResult};
use crate::pool::{GlobalShutdownTimeout, HandshakeTimeout, PoolSettings};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkbridgeSettings {
    pub pool: PoolConfig,
}

/// The `[pool]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of workers the CLI spawns
    pub workers: usize,
    pub handshake_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: u64,
    /// Program and arguments of a worker process; defaults to this binary in worker mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_command: Option<Vec<String>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            handshake_timeout_ms: 30_000,
            request_timeout_ms: None,
            shutdown_timeout_ms: 10_000,
            worker_command: None,
        }
    }
}

impl PoolConfig {
    /// Check values that the pool types do not validate themselves.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("request-timeout-ms", "must be positive"));
        }
        if self.worker_command.as_ref().is_some_and(|command| command.is_empty()) {
            return Err(ConfigError::invalid("worker-command", "must not be empty"));
        }
        self.to_settings().map(|_| ())
    }

    /// Convert to validated pool settings.
    pub fn to_settings(&self) -> ConfigResult<PoolSettings> {
        let handshake_timeout =
            HandshakeTimeout::new(Duration::from_millis(self.handshake_timeout_ms))
                .map_err(|e| ConfigError::invalid("handshake-timeout-ms", e.to_string()))?;
        let shutdown_timeout =
            GlobalShutdownTimeout::new(Duration::from_millis(self.shutdown_timeout_ms))
                .map_err(|e| ConfigError::invalid("shutdown-timeout-ms", e.to_string()))?;

        Ok(PoolSettings {
            handshake_timeout,
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
            shutdown_timeout,
        })
    }
}
