//! Configuration management

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub request_check: RequestCheckConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/chit.db".to_string()
}

/// Expiry scanner timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

fn default_scan_interval() -> u64 {
    10
}

fn default_initial_delay() -> u64 {
    2
}

/// Opportunistic expiry check run from inbound requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
}

impl Default for RequestCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: default_min_interval(),
        }
    }
}

impl RequestCheckConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

fn default_min_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SettlementConfig {
    /// Fixes the fallback winner draw; unset draws from OS entropy
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_true")]
    pub notify_winners: bool,
    #[serde(default = "default_true")]
    pub notify_payments: bool,
    #[serde(default = "default_true")]
    pub notify_cycles: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CHIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
