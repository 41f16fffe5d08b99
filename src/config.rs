//! Session configuration
//!
//! Logging is on by default in debug builds and off in release builds,
//! unless the configuration says otherwise.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// URL with a `stun:`/`turn:` scheme, added from `type` when missing
    pub fn url_with_scheme(&self) -> String {
        if self.url.starts_with("turn:")
            || self.url.starts_with("turns:")
            || self.url.starts_with("stun:")
        {
            self.url.clone()
        } else {
            let scheme = if self.r#type == "turn" { "turn:" } else { "stun:" };
            format!("{}{}", scheme, self.url)
        }
    }
}

/// Public STUN servers used when nothing is configured
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

/// Configuration of one [`CallSession`](crate::session::CallSession)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Name announced to the room on join
    pub display_name: String,

    /// STUN/TURN servers for the WebRTC transport
    pub ice_servers: Vec<ServerConfig>,

    /// Give up on an unanswered offer after this many milliseconds (0 = wait forever)
    pub negotiation_timeout_ms: u64,

    /// Answerer starts sending its camera/mic right after answering the first offer
    pub share_on_answer: bool,

    /// `run` returns the session to Idle after the peer ends the call or leaves
    pub rearm_after_remote_end: bool,

    /// Default tracing level when `RUST_LOG` is unset
    pub log_level: String,

    pub logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "anonymous".into(),
            ice_servers: default_ice_servers(),
            negotiation_timeout_ms: 0,
            share_on_answer: true,
            rearm_after_remote_end: true,
            log_level: "info".into(),
            logging: LOGGING_ENABLED,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!(
                    "ICE server '{}' has an empty url",
                    server.id
                )));
            }
            if server.r#type != "stun" && server.r#type != "turn" {
                return Err(Error::Config(format!(
                    "ICE server '{}' has unknown type '{}'",
                    server.id, server.r#type
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        (self.negotiation_timeout_ms > 0).then(|| Duration::from_millis(self.negotiation_timeout_ms))
    }
}
