//! Consent gate for runtime capability requests.
//!
//! At most one prompt is pending. A second request while one is pending
//! overwrites it.

use anyhow::Result;
use parking_lot::Mutex;

use super::collaborators::HostServices;
use super::registry::SessionRegistry;
use super::traits::{OwnUser, PluginDescriptor, PluginPermission, RequestedPermission};

/// Capability waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPermission {
    pub plugin_id: String,
    pub capability: RequestedPermission,
    /// The backing identity is not linked yet; accepting opens linking.
    pub needs_account_link: bool,
}

/// Outcome of evaluating a capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Linked and accepted already; nothing to ask.
    AlreadyGranted,
    /// The plugin never declared this capability.
    NotDeclared,
    /// A consent prompt was surfaced.
    Prompted,
}

/// Decide whether `capability` needs a prompt for this plugin and user.
pub fn evaluate(
    descriptor: &PluginDescriptor,
    user: Option<&OwnUser>,
    capability: RequestedPermission,
) -> (GateDecision, bool) {
    let permission = capability.permission();
    let user_has_account = user.is_some_and(|user| user.has_account_for(capability));
    let has_permission = descriptor.has_accepted(permission);
    let can_add_permission = descriptor.permissions.declares(permission);

    let decision = if !can_add_permission {
        GateDecision::NotDeclared
    } else if user_has_account && has_permission {
        GateDecision::AlreadyGranted
    } else {
        GateDecision::Prompted
    };
    (decision, !user_has_account)
}

/// `accepted ∪ {permission}`, keeping the existing order.
pub fn merged_permissions(
    accepted: Option<&[PluginPermission]>,
    permission: PluginPermission,
) -> Vec<PluginPermission> {
    let mut merged = accepted.map(<[PluginPermission]>::to_vec).unwrap_or_default();
    if !merged.contains(&permission) {
        merged.push(permission);
    }
    merged
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    pending: Mutex<Option<PendingPermission>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a request and surface the consent prompt when needed.
    pub fn request_permission(
        &self,
        descriptor: &PluginDescriptor,
        user: Option<&OwnUser>,
        capability: RequestedPermission,
        services: &HostServices,
    ) -> GateDecision {
        let (decision, needs_account_link) = evaluate(descriptor, user, capability);
        tracing::debug!(
            plugin_id = %descriptor.id,
            capability = ?capability,
            decision = ?decision,
            "Evaluated plugin permission request"
        );

        if decision == GateDecision::Prompted {
            let previous = self.pending.lock().replace(PendingPermission {
                plugin_id: descriptor.id.clone(),
                capability,
                needs_account_link,
            });
            if let Some(previous) = previous {
                tracing::debug!(
                    plugin_id = %previous.plugin_id,
                    capability = ?previous.capability,
                    "Replacing pending permission prompt"
                );
            }
            services.consent.show_permission_prompt(capability);
        }
        decision
    }

    pub fn pending(&self) -> Option<PendingPermission> {
        self.pending.lock().clone()
    }

    /// Drop the pending prompt without changing anything.
    pub fn cancel(&self) -> Option<PendingPermission> {
        self.pending.lock().take()
    }

    /// Accept the pending prompt.
    ///
    /// Opens identity linking when the account is missing, then persists the
    /// grown permission list and mirrors it into the live session.
    pub async fn accept(
        &self,
        registry: &SessionRegistry,
        services: &HostServices,
    ) -> Result<Option<Vec<PluginPermission>>> {
        let Some(pending) = self.pending.lock().take() else {
            return Ok(None);
        };

        if pending.needs_account_link {
            services.identity_linker.open_account_linking(pending.capability);
        }

        let current = registry
            .snapshot()
            .filter(|session| session.plugin_id() == pending.plugin_id);
        let Some(session) = current else {
            tracing::warn!(
                plugin_id = %pending.plugin_id,
                "Permission accepted after plugin was unloaded, ignoring"
            );
            return Ok(None);
        };

        let permissions = merged_permissions(
            session.descriptor().accepted_permissions.as_deref(),
            pending.capability.permission(),
        );
        services
            .plugin_store
            .accept_plugin_permissions(&pending.plugin_id, &permissions)
            .await?;

        registry.with_session(|session| {
            if session.plugin_id() == pending.plugin_id {
                let descriptor = session.descriptor_mut();
                let merged = merged_permissions(
                    descriptor.accepted_permissions.as_deref(),
                    pending.capability.permission(),
                );
                descriptor.accepted_permissions = Some(merged);
            }
        });

        tracing::info!(
            plugin_id = %pending.plugin_id,
            capability = ?pending.capability,
            "Plugin permission accepted"
        );
        Ok(Some(permissions))
    }
}
