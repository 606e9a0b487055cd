//! Simulator configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/simulator.toml` (optional; built-in defaults apply when absent)
//! 2. Environment variables prefixed with `TEM_SIM_`, nested with `__`
//!
//! The defaults reproduce the behaviour of the physical instrument, so the
//! simulator runs without any configuration file at all.
//!
//! # Example
//! ```no_run
//! use tem_sim::config::SimConfig;
//!
//! let config = SimConfig::load()?;
//! println!("Listening on {}", config.server.bind_address());
//! # Ok::<(), tem_sim::error::SimError>(())
//! ```

use crate::device::AcquisitionParameters;
use crate::error::{SimError, SimResult};
use crate::protocol::CollectSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/simulator.toml";
/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "TEM_SIM_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// TCP listener settings
    pub server: ServerConfig,
    /// `START_COLLECT` behaviour
    pub collect: CollectConfig,
    /// Acquisition parameters at power-up
    pub parameters: AcquisitionParameters,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "TEM Device Simulator".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// TCP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind, `0.0.0.0` for all
    pub host: String,
    /// Listening port
    pub port: u16,
    /// Bytes accepted per read; one read is one command
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            read_buffer_size: 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Acquisition sequence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Records per `START_COLLECT`
    pub iterations: u32,
    /// Pause before each record in milliseconds
    pub interval_ms: u64,
    /// Fixed noise seed for reproducible sessions
    pub noise_seed: Option<u64>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            interval_ms: 300,
            noise_seed: None,
        }
    }
}

impl CollectConfig {
    /// Runtime form used by [`crate::protocol::CommandProtocol`].
    pub fn settings(&self) -> CollectSettings {
        CollectSettings {
            iterations: self.iterations,
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

impl SimConfig {
    /// Load configuration from the default path and environment variables
    ///
    /// Example override: `TEM_SIM_SERVER__PORT=9000`
    pub fn load() -> SimResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SimResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SimError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.server.host.trim().is_empty() {
            return Err(SimError::Configuration("server.host must not be empty".into()));
        }

        if self.server.read_buffer_size == 0 {
            return Err(SimError::Configuration(
                "server.read_buffer_size must be greater than 0".into(),
            ));
        }

        if self.collect.iterations == 0 {
            return Err(SimError::Configuration(
                "collect.iterations must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
