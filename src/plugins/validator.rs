//! Origin and correlation checks applied before anything else.
//!
//! Messages failing either check are dropped without a reply.

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::BridgeError;
use super::registry::IframeSession;
use super::traits::{PluginRequest, RequestHeader};

/// Origin reported by opaque sandboxed contexts.
pub const OPAQUE_ORIGIN: &str = "null";

/// A message as delivered by the host window's `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// `event.origin` as reported by the browser
    pub origin: String,
    /// `event.data`
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// A message that passed both checks.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedMessage {
    pub header: RequestHeader,
    pub transport: PluginRequest,
}

/// Whether `origin` may talk to a session targeting `target_origin`.
///
/// The opaque origin is let through: such contexts cannot assert a real
/// origin, and the correlation token still has to match.
pub fn origin_allowed(origin: &str, target_origin: &str) -> bool {
    if origin == OPAQUE_ORIGIN {
        return true;
    }
    Url::parse(origin)
        .map(|url| url.origin().ascii_serialization() == target_origin)
        .unwrap_or(false)
}

/// Run the origin and correlation checks against the live session.
pub fn accept(event: &InboundEvent, session: &IframeSession) -> Result<AcceptedMessage, BridgeError> {
    if !origin_allowed(&event.origin, session.target_origin()) {
        tracing::warn!(
            origin = %event.origin,
            expected = %session.target_origin(),
            "Dropping plugin message from unexpected origin"
        );
        return Err(BridgeError::OriginMismatch);
    }

    let transport: PluginRequest = serde_json::from_value(event.data.clone()).map_err(|e| {
        tracing::warn!(origin = %event.origin, error = %e, "Dropping malformed plugin message");
        BridgeError::MalformedMessage
    })?;
    let header: RequestHeader = serde_json::from_str(&transport.request).map_err(|e| {
        tracing::warn!(origin = %event.origin, error = %e, "Dropping unparsable plugin request");
        BridgeError::MalformedMessage
    })?;

    if header.iframe_uid != session.correlation_token() {
        tracing::warn!(
            iframe_uid = %header.iframe_uid,
            request_id = %header.request_id,
            "Received message from unknown iframe"
        );
        return Err(BridgeError::UnknownIframe);
    }

    Ok(AcceptedMessage { header, transport })
}
