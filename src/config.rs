//! Configuration for workbridge.
//!
//! Settings come from a TOML file with a single `[pool]` table:
//!
//! ```toml
//! [pool]
//! workers = 3
//! handshake-timeout-ms = 30000
//! request-timeout-ms = 60000
//! shutdown-timeout-ms = 10000
//! worker-command = ["workbridge", "worker"]
//! ```
//!
//! Every key is optional. The user-wide file lives at
//! `$XDG_CONFIG_HOME/workbridge/workbridge.toml`.

pub mod settings;
pub mod user;

pub use settings::{PoolConfig, WorkbridgeSettings};
pub use user::{ConfigError, ConfigResult, load_config, load_user_config, user_config_path};
