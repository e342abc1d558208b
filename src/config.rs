use crate::simulator::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_ENV: &str = "SEPARATION_TWIN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_port: u16,
    pub opcua_port: u16,
    /// Wall-clock frame period of the simulation loop
    pub tick_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_port: 3000,
            opcua_port: 4840,
            tick_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Reads the file named by `SEPARATION_TWIN_CONFIG`, or the built-in
    /// defaults when it is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => {
                tracing::info!("{} not set, using built-in defaults", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|source| ConfigError::Parse { path: shown.clone(), source })?;
        tracing::info!("loaded config from {}", shown);
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
