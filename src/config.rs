//! TOML configuration.
//!
//! Every section is optional; an empty file yields the defaults below.
//!
//! ```toml
//! [server]
//! base_url = "http://127.0.0.1:8080"
//! session = "..."
//!
//! [filter]
//! start_marker = "<think>"
//! end_marker = "</think>"
//!
//! [redaction]
//! placeholder = "***"
//!
//! [turn]
//! max_message_chars = 3000
//! reveal_delay_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HuntError;
use crate::redact::{SecretRedactor, DEFAULT_GUIDANCE_PATTERNS, DEFAULT_PLACEHOLDER};
use crate::scrubber::{Markers, THINK_END, THINK_START};

pub const ENV_BASE_URL: &str = "HUNT_BASE_URL";
pub const ENV_SESSION: &str = "HUNT_SESSION";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuntConfig {
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub redaction: RedactionConfig,
    pub turn: TurnConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Value of the `session` cookie issued at login.
    pub session: Option<String>,
    pub connect_timeout_secs: u64,
    /// Applies to the whole streamed response, so keep it generous.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            session: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub start_marker: String,
    pub end_marker: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            start_marker: THINK_START.to_string(),
            end_marker: THINK_END.to_string(),
        }
    }
}

impl FilterConfig {
    pub fn markers(&self) -> Result<Markers, HuntError> {
        Markers::new(self.start_marker.clone(), self.end_marker.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub placeholder: String,
    /// Regex templates; `{placeholder}` stands for the escaped placeholder.
    pub guidance_patterns: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            guidance_patterns: DEFAULT_GUIDANCE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl RedactionConfig {
    pub fn redactor(&self) -> Result<SecretRedactor, HuntError> {
        SecretRedactor::new(self.placeholder.clone(), self.guidance_patterns.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub max_message_chars: usize,
    /// Delay before the win/loss outcome is presented after a reveal.
    pub reveal_delay_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 3000,
            reveal_delay_ms: 1000,
        }
    }
}

impl TurnConfig {
    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }
}

impl HuntConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, HuntError> {
        toml::from_str(s).map_err(|e| HuntError::Config {
            path: "<inline>".to_string(),
            detail: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, HuntError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HuntError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| HuntError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Apply `HUNT_BASE_URL` / `HUNT_SESSION` when set and non-empty.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_BASE_URL).ok(),
            std::env::var(ENV_SESSION).ok(),
        );
    }

    pub fn apply_overrides(&mut self, base_url: Option<String>, session: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            self.server.base_url = url;
        }
        if let Some(session) = session.filter(|s| !s.is_empty()) {
            self.server.session = Some(session);
        }
    }

    /// Check markers and compile the guidance patterns.
    pub fn validate(&self) -> Result<(), HuntError> {
        self.filter.markers()?;
        self.redaction.redactor()?;
        if self.turn.max_message_chars == 0 {
            return Err(HuntError::Config {
                path: "turn.max_message_chars".to_string(),
                detail: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
