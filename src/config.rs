// Application configuration.
// Logging is on by default only in debug builds; release builds need an explicit filter.

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:3000";
pub const DEFAULT_LOG_FILTER: &str = "callmesh=debug,webrtc=warn";

pub const ENV_SIGNALING_URL: &str = "CALLMESH_SIGNALING_URL";
pub const ENV_LOG: &str = "CALLMESH_LOG";

/// STUN servers used when the configuration names none
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    /// `None` means "use the build default"
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.into(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            log_filter: None,
        }
    }
}

impl Config {
    /// Reads a JSON config file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str::<Config>(&raw)?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SIGNALING_URL) {
            self.signaling_url = url;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log_filter = Some(filter);
        }
    }

    /// Rejects empty server urls and TURN entries without credentials.
    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.is_empty() {
            return Err(Error::Config("signaling url cannot be empty".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!("ice server {} has no url", server.id)));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "turn server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    /// Effective log filter, or `None` when logging stays off.
    pub fn effective_log_filter(&self) -> Option<String> {
        match &self.log_filter {
            Some(filter) => Some(filter.clone()),
            None if LOGGING_ENABLED => Some(DEFAULT_LOG_FILTER.to_string()),
            None => None,
        }
    }
}
