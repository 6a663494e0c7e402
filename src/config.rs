//! Process configuration, built once at startup.
//!
//! Layers, later ones win:
//!
//! 1. Built-in defaults
//! 2. `<config dir>/twinprobe/config.toml`, or the file passed with `--config`
//! 3. `MQTT_CLIENT`, `MQTT_USER`, `MQTT_PASSWD`, `MQTT_HOST`, `MQTT_PORT`
//! 4. Command-line flags (applied by the binaries)
//!
//! ```toml
//! [bus]
//! host = "broker.local"
//! port = 1883
//! client_id = "bench-probe"
//!
//! [exchange]
//! window_secs = 30
//! qos = 1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProbeError, Result};
use crate::mqtt::{qos_from_level, BusConfig};

const CONFIG_DIR: &str = "twinprobe";
const CONFIG_FILE: &str = "config.toml";

pub const ENV_CLIENT: &str = "MQTT_CLIENT";
pub const ENV_USER: &str = "MQTT_USER";
pub const ENV_PASSWD: &str = "MQTT_PASSWD";
pub const ENV_HOST: &str = "MQTT_HOST";
pub const ENV_PORT: &str = "MQTT_PORT";

/// How long to listen and at which delivery level to talk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub window_secs: u64,
    pub qos: u8,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            window_secs: 30,
            qos: 1,
        }
    }
}

impl ExchangeSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn qos(&self) -> Result<QoS> {
        qos_from_level(self.qos)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub bus: BusConfig,
    pub exchange: ExchangeSettings,
}

impl ProbeConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads file and environment layers.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => match Self::default_path() {
                Some(default) if tokio::fs::try_exists(&default).await.unwrap_or(false) => {
                    Self::from_file(&default).await?
                }
                _ => {
                    debug!("No configuration file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProbeError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content).map_err(|e| {
            ProbeError::ConfigError(format!("{}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProbeError::ConfigError(e.to_string()))
    }

    /// Overlays the `MQTT_*` variables; empty values count as unset
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(client_id) = get(ENV_CLIENT) {
            self.bus.client_id = client_id;
        }
        if let Some(user) = get(ENV_USER) {
            self.bus.username = Some(user);
        }
        if let Some(password) = get(ENV_PASSWD) {
            self.bus.password = Some(password);
        }
        if let Some(host) = get(ENV_HOST) {
            self.bus.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            self.bus.port = port.trim().parse().map_err(|_| {
                ProbeError::ConfigError(format!("{}='{}' is not a valid port", ENV_PORT, port))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bus.validate()?;
        self.exchange.qos()?;
        Ok(())
    }
}
