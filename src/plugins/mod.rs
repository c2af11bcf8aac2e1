//! Host side of the sandboxed plugin iframe protocol.
//!
//! Third-party plugins run inside a sandboxed iframe and talk to the host by
//! posting JSON envelopes. This module validates those envelopes, enforces
//! quotas, answers what it can locally, forwards signed requests to the
//! backend and correlates every reply with the request that caused it.
//!
//! # Security Model
//!
//! - **Origin pinning**: messages must come from the plugin's own origin
//!   (opaque `"null"` origins are let through, the token still has to match)
//! - **Per-mount token**: a fresh correlation token is minted for every
//!   mounted plugin; messages carrying any other token are dropped silently
//! - **Quotas**: 100 requests per minute, one navigation or consent prompt per
//!   five seconds, per mounted iframe
//! - **Consent**: capabilities are only granted after a user prompt, and only
//!   if the plugin declared them
//! - **No wildcard replies**: replies are addressed to the plugin origin or not
//!   sent at all
//!
//! # Example Configuration
//!
//! ```toml
//! [rate_limits]
//! general_max_requests = 100
//! sensitive_window_secs = 5
//!
//! [forwarding]
//! timeout_secs = 30
//! ```

pub mod collaborators;
pub mod correlator;
pub mod error;
pub mod factory;
pub mod forwarder;
pub mod permission;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod traits;
pub mod validator;

pub use collaborators::{HostServices, HostUrlClassifier};
pub use correlator::Delivery;
pub use error::BridgeError;
pub use factory::{create_bridge, create_bridge_from_path};
pub use permission::{GateDecision, PendingPermission};
pub use rate_limit::{Clock, ManualClock, SystemClock};
pub use registry::{MountInfo, SessionRegistry, Theme};
pub use router::{Outcome, PluginBridge, Stage};
pub use traits::{PluginDescriptor, PluginPermission, RequestedPermission};
pub use validator::InboundEvent;
