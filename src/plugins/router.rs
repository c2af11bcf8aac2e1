//! Request router: the entry point for every message a plugin posts.
//!
//! A message moves `Validating → RateChecking → {SafeHandling |
//! PrivilegedForwarding} → Responding`. Once it passes validation, exactly one
//! reply is produced on every path.

use anyhow::Result;

use crate::config::BridgeConfig;

use super::collaborators::HostServices;
use super::correlator::{Delivery, ResponseCorrelator};
use super::error::BridgeError;
use super::forwarder::PrivilegedForwarder;
use super::permission::{GateDecision, PendingPermission, PermissionGate};
use super::registry::{MountInfo, SessionRegistry, Theme};
use super::traits::{
    InitData, PluginDescriptor, PluginPermission, RequestEnvelope, ResponseData, SafeRequest,
};
use super::validator::{self, InboundEvent};

/// Path that produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateChecking,
    SafeHandling,
    PrivilegedForwarding,
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Dropped without a reply.
    Rejected { error: BridgeError },
    /// Exactly one reply was produced.
    Responded {
        request_id: String,
        stage: Stage,
        delivery: Delivery,
    },
}

impl Outcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// State captured from the session while it is locked.
struct Admitted {
    token: String,
    request_id: String,
    descriptor: PluginDescriptor,
    envelope: Result<RequestEnvelope, BridgeError>,
}

enum Admission {
    Admitted(Admitted),
    /// Session error; no reply.
    Silent(BridgeError),
    /// Trusted sender over quota; gets a correlated error.
    OverQuota {
        token: String,
        request_id: String,
        plugin_id: String,
        error: BridgeError,
    },
}

/// Host side of the plugin protocol for the single mounted iframe.
pub struct PluginBridge {
    registry: SessionRegistry,
    gate: PermissionGate,
    forwarder: PrivilegedForwarder,
    correlator: ResponseCorrelator,
    services: HostServices,
}

impl PluginBridge {
    pub fn new(config: &BridgeConfig, services: HostServices) -> Self {
        Self {
            registry: SessionRegistry::new(config.session.clone(), config.rate_limits.clone()),
            gate: PermissionGate::new(),
            forwarder: PrivilegedForwarder::new(&services).with_timeout(config.forwarding.timeout()),
            correlator: ResponseCorrelator::new(services.sink.clone()),
            services,
        }
    }

    // ── Session lifecycle ──────────────────────────────────────────────────

    /// Mount a plugin, replacing whatever was mounted before.
    pub fn load_plugin(&self, descriptor: PluginDescriptor, theme: Theme) -> Result<MountInfo> {
        let previous = self.registry.current_token();
        let info = self.registry.load(descriptor, theme)?;
        if previous.as_deref() != Some(info.correlation_token.as_str()) {
            self.gate.cancel();
        }
        Ok(info)
    }

    pub fn unload_plugin(&self) {
        self.registry.unload();
        self.gate.cancel();
    }

    pub fn set_theme(&self, theme: Theme) -> Option<MountInfo> {
        self.registry.set_theme(theme)
    }

    pub fn mount_info(&self) -> Option<MountInfo> {
        self.registry.mount_info()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Consent ────────────────────────────────────────────────────────────

    pub fn pending_permission(&self) -> Option<PendingPermission> {
        self.gate.pending()
    }

    /// User accepted the pending prompt.
    pub async fn accept_pending_permission(&self) -> Result<Option<Vec<PluginPermission>>> {
        self.gate.accept(&self.registry, &self.services).await
    }

    /// User dismissed the pending prompt.
    pub fn cancel_pending_permission(&self) -> Option<PendingPermission> {
        self.gate.cancel()
    }

    // ── Messages ───────────────────────────────────────────────────────────

    /// Handle one `message` event from the plugin iframe.
    pub async fn handle_message(&self, event: InboundEvent) -> Outcome {
        let admitted = match self.admit(&event) {
            Admission::Admitted(admitted) => admitted,
            Admission::Silent(error) => return Outcome::Rejected { error },
            Admission::OverQuota {
                token,
                request_id,
                plugin_id,
                error,
            } => {
                let delivery =
                    self.correlator
                        .respond_error(&self.registry, &token, &request_id, &plugin_id, &error);
                return Outcome::Responded {
                    request_id,
                    stage: Stage::RateChecking,
                    delivery,
                };
            }
        };

        let Admitted {
            token,
            request_id,
            descriptor,
            envelope,
        } = admitted;

        let (stage, delivery) = match envelope {
            Err(error) => (
                Stage::SafeHandling,
                self.correlator
                    .respond_error(&self.registry, &token, &request_id, &descriptor.id, &error),
            ),
            Ok(RequestEnvelope::Safe(request)) => {
                let data = self.handle_safe(&descriptor, request);
                (
                    Stage::SafeHandling,
                    self.correlator
                        .respond(&self.registry, &token, &request_id, &descriptor.id, data),
                )
            }
            Ok(RequestEnvelope::Privileged(request)) => {
                let delivery = match self
                    .forwarder
                    .forward(&descriptor.community_id, &request_id, &request)
                    .await
                {
                    Ok(response) => self.correlator.relay(&self.registry, &token, &request_id, response),
                    Err(error) => self.correlator.respond_error(
                        &self.registry,
                        &token,
                        &request_id,
                        &descriptor.id,
                        &error,
                    ),
                };
                (Stage::PrivilegedForwarding, delivery)
            }
        };

        Outcome::Responded {
            request_id,
            stage,
            delivery,
        }
    }

    /// Validation, classification and quota checks under the session lock.
    fn admit(&self, event: &InboundEvent) -> Admission {
        let now = self.services.clock.now_ms();
        self.registry
            .with_session(|session| {
                let accepted = match validator::accept(event, session) {
                    Ok(accepted) => accepted,
                    Err(error) => return Admission::Silent(error),
                };
                let token = session.correlation_token().to_string();
                let request_id = accepted.header.request_id.clone();
                let envelope = RequestEnvelope::classify(&accepted.header, &accepted.transport);
                let sensitive =
                    matches!(&envelope, Ok(RequestEnvelope::Safe(safe)) if safe.is_sensitive());

                let limiter = session.limiter_mut();
                let mut quota = limiter.check_general(now);
                if quota.is_ok() && sensitive {
                    quota = limiter.check_sensitive(now);
                }
                if let Err(error) = quota {
                    tracing::warn!(
                        plugin_id = %session.plugin_id(),
                        request_id = %request_id,
                        error = %error,
                        "Plugin request over quota"
                    );
                    return Admission::OverQuota {
                        token,
                        request_id,
                        plugin_id: session.plugin_id().to_string(),
                        error,
                    };
                }

                tracing::debug!(
                    plugin_id = %session.plugin_id(),
                    request_id = %request_id,
                    kind = %accepted.header.kind,
                    "Accepted plugin request"
                );
                Admission::Admitted(Admitted {
                    token,
                    request_id,
                    descriptor: session.descriptor().clone(),
                    envelope,
                })
            })
            .unwrap_or_else(|| {
                tracing::debug!("Plugin message with no mounted plugin, dropping");
                Admission::Silent(BridgeError::NoActiveSession)
            })
    }

    fn handle_safe(&self, descriptor: &PluginDescriptor, request: SafeRequest) -> ResponseData {
        match request {
            SafeRequest::Init => {
                let user_id = self
                    .services
                    .user
                    .own_user()
                    .map(|user| user.id)
                    .unwrap_or_default();
                ResponseData::Init(InitData {
                    plugin_id: descriptor.id.clone(),
                    assignable_role_ids: descriptor.assignable_role_ids(),
                    user_id,
                })
            }
            SafeRequest::Navigate { to } => {
                match self.services.url_classifier.is_local_url(&to) {
                    Some(path) => {
                        tracing::debug!(plugin_id = %descriptor.id, path = %path, "Plugin navigation");
                        self.services.navigator.navigate(&path);
                    }
                    None => {
                        tracing::debug!(plugin_id = %descriptor.id, url = %to, "Plugin external link");
                        self.services.external_links.show_modal(&to);
                    }
                }
                ResponseData::ack()
            }
            SafeRequest::RequestPermission { permission } => {
                let user = self.services.user.own_user();
                let decision =
                    self.gate
                        .request_permission(descriptor, user.as_ref(), permission, &self.services);
                if decision == GateDecision::NotDeclared {
                    tracing::debug!(
                        plugin_id = %descriptor.id,
                        capability = ?permission,
                        "Plugin requested undeclared capability"
                    );
                }
                ResponseData::ack()
            }
        }
    }
}

impl std::fmt::Debug for PluginBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBridge")
            .field("registry", &self.registry)
            .field("forwarder", &self.forwarder)
            .field("pending", &self.gate.pending())
            .finish_non_exhaustive()
    }
}
