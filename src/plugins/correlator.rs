//! Packages replies and posts them back into the originating iframe.
//!
//! Replies are always addressed to the live session's own origin. If the
//! session that produced the request is gone, the reply is dropped rather
//! than sent anywhere else.

use std::sync::Arc;

use super::collaborators::ResponseSink;
use super::error::BridgeError;
use super::registry::SessionRegistry;
use super::traits::{OutboundMessage, PluginResponse, ResponseData, ResponseInner};

/// What happened to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { target_origin: String },
    /// The originating session no longer exists.
    Dropped,
}

pub struct ResponseCorrelator {
    sink: Arc<dyn ResponseSink>,
}

impl ResponseCorrelator {
    pub fn new(sink: Arc<dyn ResponseSink>) -> Self {
        Self { sink }
    }

    /// Encode a host-generated reply and deliver it.
    pub fn respond(
        &self,
        registry: &SessionRegistry,
        token: &str,
        request_id: &str,
        plugin_id: &str,
        data: ResponseData,
    ) -> Delivery {
        let inner = ResponseInner {
            data,
            plugin_id: plugin_id.to_string(),
            request_id: request_id.to_string(),
        };
        let payload = match PluginResponse::unsigned(&inner) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to encode plugin response");
                let fallback = ResponseInner {
                    data: ResponseData::error(&BridgeError::Collaborator(e.to_string())),
                    ..inner
                };
                PluginResponse {
                    response: serde_json::to_string(&fallback).unwrap_or_default(),
                    signature: None,
                }
            }
        };
        self.relay(registry, token, request_id, payload)
    }

    /// Wrap an error as a correlated reply.
    pub fn respond_error(
        &self,
        registry: &SessionRegistry,
        token: &str,
        request_id: &str,
        plugin_id: &str,
        err: &BridgeError,
    ) -> Delivery {
        self.respond(registry, token, request_id, plugin_id, ResponseData::error(err))
    }

    /// Deliver an already encoded payload (e.g. a signed backend reply).
    pub fn relay(
        &self,
        registry: &SessionRegistry,
        token: &str,
        request_id: &str,
        payload: PluginResponse,
    ) -> Delivery {
        let target_origin = registry.with_session(|session| {
            (session.correlation_token() == token).then(|| session.target_origin().to_string())
        });
        let Some(target_origin) = target_origin.flatten() else {
            tracing::debug!(request_id = %request_id, "Session gone, dropping plugin response");
            return Delivery::Dropped;
        };

        let message = OutboundMessage {
            request_id: request_id.to_string(),
            payload,
        };
        self.sink.post_message(&message, &target_origin);
        tracing::trace!(request_id = %request_id, target_origin = %target_origin, "Posted plugin response");
        Delivery::Delivered { target_origin }
    }
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, SessionConfig};
    use crate::plugins::registry::Theme;
    use crate::plugins::traits::PluginDescriptor;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        posted: Mutex<Vec<(OutboundMessage, String)>>,
    }

    impl ResponseSink for RecordingSink {
        fn post_message(&self, message: &OutboundMessage, target_origin: &str) {
            self.posted.lock().push((message.clone(), target_origin.to_string()));
        }
    }

    fn registry_with(url: &str) -> (SessionRegistry, String) {
        let registry = SessionRegistry::new(SessionConfig::default(), RateLimitConfig::default());
        let info = registry
            .load(
                PluginDescriptor {
                    id: "p1".into(),
                    community_id: "c1".into(),
                    url: url.into(),
                    config: Default::default(),
                    permissions: Default::default(),
                    accepted_permissions: None,
                },
                Theme::Light,
            )
            .unwrap();
        (registry, info.correlation_token)
    }

    #[test]
    fn replies_go_to_the_plugin_origin() {
        let sink = Arc::new(RecordingSink::default());
        let correlator = ResponseCorrelator::new(sink.clone());
        let (registry, token) = registry_with("plugin.example.com/app");

        let delivery = correlator.respond(&registry, &token, "r1", "p1", ResponseData::ack());
        assert_eq!(
            delivery,
            Delivery::Delivered {
                target_origin: "https://plugin.example.com".into()
            }
        );

        let posted = sink.posted.lock();
        assert_eq!(posted.len(), 1);
        let (message, origin) = &posted[0];
        assert_eq!(origin, "https://plugin.example.com");
        assert_eq!(message.request_id, "r1");
        let inner: serde_json::Value = serde_json::from_str(&message.payload.response).unwrap();
        assert_eq!(inner["data"], serde_json::json!({"ok": true}));
        assert_eq!(inner["requestId"], "r1");
    }

    #[test]
    fn errors_are_wrapped_as_data() {
        let sink = Arc::new(RecordingSink::default());
        let correlator = ResponseCorrelator::new(sink.clone());
        let (registry, token) = registry_with("plugin.example.com");

        correlator.respond_error(&registry, &token, "r2", "p1", &BridgeError::UnknownSafeRequest);
        let posted = sink.posted.lock();
        let inner: serde_json::Value = serde_json::from_str(&posted[0].0.payload.response).unwrap();
        assert_eq!(inner["data"]["error"], "UNKNOWN_SAFE_REQUEST");
    }

    #[test]
    fn stale_token_is_never_delivered() {
        let sink = Arc::new(RecordingSink::default());
        let correlator = ResponseCorrelator::new(sink.clone());
        let (registry, _token) = registry_with("plugin.example.com");

        let delivery = correlator.respond(&registry, "OLDTOKEN", "r3", "p1", ResponseData::ack());
        assert_eq!(delivery, Delivery::Dropped);
        assert!(sink.posted.lock().is_empty());

        registry.unload();
        let delivery = correlator.relay(
            &registry,
            "OLDTOKEN",
            "r4",
            PluginResponse {
                response: "{}".into(),
                signature: Some("sig".into()),
            },
        );
        assert_eq!(delivery, Delivery::Dropped);
    }
}
