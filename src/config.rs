//! Bridge configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock limits: 100 requests per minute, one navigation or consent prompt
//! per five seconds, and a 30 second backend deadline.

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BridgeConfig {
    pub rate_limits: RateLimitConfig,
    pub forwarding: ForwardingConfig,
    pub session: SessionConfig,
}

/// Sliding-window quotas per mounted iframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window for the general request quota, in seconds
    pub general_window_secs: u64,
    /// Requests allowed within the general window
    pub general_max_requests: usize,
    /// Window for navigation and permission prompts, in seconds
    pub sensitive_window_secs: u64,
    /// Navigations or prompts allowed within the sensitive window
    pub sensitive_max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_window_secs: 60,
            general_max_requests: 100,
            sensitive_window_secs: 5,
            sensitive_max_requests: 1,
        }
    }
}

impl RateLimitConfig {
    pub fn general_window(&self) -> Duration {
        Duration::from_secs(self.general_window_secs)
    }

    pub fn sensitive_window(&self) -> Duration {
        Duration::from_secs(self.sensitive_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Deadline for the signed-request executor, in seconds
    pub timeout_secs: u64,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ForwardingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Iframe mount parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of the per-mount correlation token
    pub token_length: usize,
    /// `cg_bg_color` sent to plugins in dark mode
    pub dark_background: String,
    /// `cg_bg_color` sent to plugins in light mode
    pub light_background: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_length: 10,
            dark_background: "#161820".into(),
            light_background: "#F1F1F1".into(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse bridge config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                path = %path.display(),
                "Bridge config not found, using defaults"
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridge config: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid bridge config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limits;
        if limits.general_window_secs == 0 || limits.sensitive_window_secs == 0 {
            anyhow::bail!("rate limit windows must be at least one second");
        }
        if limits.general_max_requests == 0 || limits.sensitive_max_requests == 0 {
            anyhow::bail!("rate limit caps must allow at least one request");
        }
        if self.forwarding.timeout_secs == 0 {
            anyhow::bail!("forwarding.timeout_secs must be greater than zero");
        }
        if self.session.token_length == 0 {
            anyhow::bail!("session.token_length must be greater than zero");
        }
        Ok(())
    }

    /// Pretty-printed JSON schema of the configuration file.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(BridgeConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}
