//! Bridge construction from configuration.

use std::path::Path;

use crate::config::BridgeConfig;

use super::collaborators::HostServices;
use super::router::PluginBridge;

/// Factory: build a bridge from an in-memory configuration.
pub fn create_bridge(config: &BridgeConfig, services: HostServices) -> anyhow::Result<PluginBridge> {
    config.validate()?;

    tracing::info!(
        general_max = config.rate_limits.general_max_requests,
        general_window_secs = config.rate_limits.general_window_secs,
        sensitive_max = config.rate_limits.sensitive_max_requests,
        sensitive_window_secs = config.rate_limits.sensitive_window_secs,
        forward_timeout_secs = config.forwarding.timeout_secs,
        "Creating plugin bridge"
    );

    Ok(PluginBridge::new(config, services))
}

/// Factory: build a bridge from a config file.
///
/// # Fallback Behavior
///
/// - File missing: stock limits
/// - File unreadable or invalid: stock limits, with an error log
pub fn create_bridge_from_path(path: &Path, services: HostServices) -> anyhow::Result<PluginBridge> {
    let config = match BridgeConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %format!("{e:#}"),
                "Invalid bridge config, falling back to defaults"
            );
            BridgeConfig::default()
        }
    };
    create_bridge(&config, services)
}
