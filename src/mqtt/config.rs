use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

/// Connection settings for one broker session.
///
/// Built once at startup (defaults, then config file, then environment) and
/// handed to [`Session::connect`](super::session::Session::connect) by reference.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// MQTT keep-alive interval, at least 5 seconds
    pub keep_alive_secs: u64,
    /// Bound on waiting for CONNACK
    pub connect_timeout_secs: u64,
    /// Bound on waiting for SUBACK/PUBACK
    pub ack_timeout_secs: u64,
    /// Request queue size between client handle and event loop
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "twinprobe".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            ack_timeout_secs: 10,
            channel_capacity: 100,
        }
    }
}

// Password stays out of logs
impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BusConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("ack_timeout_secs", &self.ack_timeout_secs)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl BusConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Username and password, if a username is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProbeError::ConfigError("broker host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ProbeError::ConfigError("broker port must not be 0".to_string()));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(ProbeError::ConfigError(format!(
                "invalid client id '{}'",
                self.client_id
            )));
        }
        if self.keep_alive_secs < 5 {
            return Err(ProbeError::ConfigError(format!(
                "keep-alive of {}s is below the 5s minimum",
                self.keep_alive_secs
            )));
        }
        if self.connect_timeout_secs == 0 || self.ack_timeout_secs == 0 {
            return Err(ProbeError::ConfigError(
                "connect and ack timeouts must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ProbeError::ConfigError(
                "channel capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_password() {
        let config = BusConfig {
            username: Some("probe".to_string()),
            password: Some("hunter2".to_string()),
            ..BusConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("probe"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn credentials_need_a_username() {
        let mut config = BusConfig {
            password: Some("secret".to_string()),
            ..BusConfig::default()
        };
        assert_eq!(config.credentials(), None);

        config.username = Some("probe".to_string());
        assert_eq!(config.credentials(), Some(("probe", "secret")));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(BusConfig::default().validate().is_ok());

        let broken = [
            BusConfig { host: " ".to_string(), ..BusConfig::default() },
            BusConfig { port: 0, ..BusConfig::default() },
            BusConfig { client_id: String::new(), ..BusConfig::default() },
            BusConfig { keep_alive_secs: 2, ..BusConfig::default() },
            BusConfig { ack_timeout_secs: 0, ..BusConfig::default() },
        ];
        for config in broken {
            assert!(matches!(config.validate(), Err(ProbeError::ConfigError(_))));
        }
    }
}
