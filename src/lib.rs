//! Host-side bridge for sandboxed plugin iframes.

pub mod config;
pub mod plugins;

pub use config::BridgeConfig;
pub use plugins::{InboundEvent, Outcome, PluginBridge};
