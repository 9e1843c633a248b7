//! Application configuration

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub simulator: SimulatorConfig,
    pub hardware: HardwareConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub session_ttl: Duration,
    /// Upper bound on the `n` accepted by the history endpoint.
    pub history_max: usize,
    /// Marks the session cookie `Secure`; enable behind TLS.
    pub cookie_secure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    pub enabled: bool,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct HardwareConfig {
    /// An upload older than this marks the hardware source as offline.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl AppConfig {
    /// Defaults, then `config/default.*`, then `TRACKER__SECTION__KEY` variables.
    pub fn load() -> Result<Self> {
        Self::load_with_prefix("TRACKER")
    }

    pub fn load_with_prefix(prefix: &str) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.http_addr", "0.0.0.0:5000")?
            .set_default(
                "server.allowed_origins",
                vec!["http://localhost:5000", "http://127.0.0.1:5000"],
            )?
            .set_default("server.session_ttl", 86_400_i64)?
            .set_default("server.history_max", 1_000_i64)?
            .set_default("server.cookie_secure", false)?
            .set_default("database.url", "sqlite://tracker.sqlite")?
            .set_default("database.max_connections", 5_i64)?
            .set_default("simulator.enabled", true)?
            .set_default("simulator.interval", 2_500_i64)?
            .set_default("hardware.timeout", 10_i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(invalid("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be greater than zero"));
        }
        if self.simulator.interval.is_zero() {
            return Err(invalid("simulator.interval must be greater than zero"));
        }
        if self.server.session_ttl.is_zero() {
            return Err(invalid("server.session_ttl must be greater than zero"));
        }
        if self.server.history_max == 0 {
            return Err(invalid("server.history_max must be greater than zero"));
        }
        if self.server.allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err(invalid(
                "server.allowed_origins cannot contain \"*\" because sessions use credentialed requests",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(config::ConfigError::Message(message.to_string()))
}
