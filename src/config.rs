// Call configuration.
// Logging defaults to on in debug builds and off in release builds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_LOG_FILTER: &str = "smartcall=debug,webrtc=warn";

/// Environment variable that overrides [`LogConfig::filter`].
pub const LOG_ENV: &str = "SMARTCALL_LOG";

/// ICE server entry as entered by the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // "stun" or "turn"
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        id: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            r#type: "turn".into(),
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(self.id.clone()));
        }
        match self.r#type.as_str() {
            "stun" => Ok(()),
            "turn" if self.username.is_none() || self.credential.is_none() => {
                Err(ConfigError::MissingTurnCredentials(self.id.clone()))
            }
            "turn" => Ok(()),
            other => Err(ConfigError::UnknownServerType {
                id: self.id.clone(),
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// How long a disconnected link may take to come back before the call fails.
    pub disconnect_grace_ms: u64,
    /// Capacity of the broadcast channel carrying [`crate::CallEvent`]s.
    pub event_capacity: usize,
    pub log: LogConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 10,
            disconnect_grace_ms: 10_000,
            event_capacity: 64,
            log: LogConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ice_servers.iter().try_for_each(ServerConfig::validate)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Same config with no ICE servers; host candidates only.
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Self::default()
        }
    }
}

/// Free public STUN servers.
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
        ServerConfig::stun("default-stun-2", "stun:stun2.l.google.com:19302"),
    ]
}
