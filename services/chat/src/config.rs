//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file (`chat.toml`, or the path in `CHAT_CONFIG`), then `CHAT__*`
//! environment variables such as `CHAT__SERVER__PORT=8080`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "chat.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where chat sessions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HS256 shared secret; required
    pub secret: String,
    pub leeway_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            leeway_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Connections idle longer than this are dropped
    pub idle_timeout_secs: u64,
    /// Six-field cron expression
    pub schedule: String,
    /// Waiting sessions older than this are ended; unset means never
    pub waiting_timeout_secs: Option<u64>,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            schedule: "0 */5 * * * *".to_string(),
            waiting_timeout_secs: None,
        }
    }
}

impl HousekeepingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn waiting_timeout(&self) -> Option<Duration> {
        self.waiting_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub jwt: JwtSettings,
    pub housekeeping: HousekeepingConfig,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl ChatConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config: ChatConfig = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("CHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Message(
                "jwt.secret must be set (CHAT__JWT__SECRET)".to_string(),
            ));
        }
        if self.housekeeping.idle_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "housekeeping.idle_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
