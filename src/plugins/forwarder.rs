//! Privileged request forwarding.
//!
//! Signed envelopes go to the backend untouched; the bridge only adds a
//! deadline and the "role claimed" notification for successful `giveRole`
//! actions.

use std::sync::Arc;
use std::time::Duration;

use super::collaborators::{HostServices, RoleClaimedNotifier, RoleDirectory, SignedRequestExecutor};
use super::error::BridgeError;
use super::traits::{PluginResponse, PrivilegedAction, PrivilegedRequest};

/// Default deadline for the signed-request executor.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PrivilegedForwarder {
    executor: Arc<dyn SignedRequestExecutor>,
    roles: Arc<dyn RoleDirectory>,
    notifier: Arc<dyn RoleClaimedNotifier>,
    timeout: Duration,
}

impl PrivilegedForwarder {
    pub fn new(services: &HostServices) -> Self {
        Self {
            executor: Arc::clone(&services.executor),
            roles: Arc::clone(&services.roles),
            notifier: Arc::clone(&services.role_notifier),
            timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }

    /// Set a custom backend deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `request` and return the backend's signed reply.
    pub async fn forward(
        &self,
        community_id: &str,
        request_id: &str,
        request: &PrivilegedRequest,
    ) -> Result<PluginResponse, BridgeError> {
        if request.transport.signature.as_deref().is_none_or(str::is_empty) {
            tracing::warn!(request_id = %request_id, "Privileged plugin request without signature");
            return Err(BridgeError::MissingSignature);
        }

        tracing::debug!(
            request_id = %request_id,
            action = ?request.action,
            "Forwarding privileged plugin request"
        );

        let response = match tokio::time::timeout(
            self.timeout,
            self.executor.plugin_request(&request.transport),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Plugin request failed");
                return Err(BridgeError::collaborator(&e));
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Plugin request timed out"
                );
                return Err(BridgeError::RequestTimeout);
            }
        };

        if let Some(PrivilegedAction::GiveRole { role_id, .. }) = &request.action {
            if response.reports_success() {
                self.notify_role_claimed(community_id, role_id).await;
            }
        }

        Ok(response)
    }

    async fn notify_role_claimed(&self, community_id: &str, role_id: &str) {
        match self.roles.roles(community_id).await {
            Ok(roles) => match roles.iter().find(|role| role.id == role_id) {
                Some(role) => self.notifier.role_claimed(role),
                None => tracing::debug!(
                    community_id = %community_id,
                    role_id = %role_id,
                    "Claimed role not found in community"
                ),
            },
            Err(e) => tracing::warn!(
                community_id = %community_id,
                error = %e,
                "Failed to load roles for claimed role notification"
            ),
        }
    }
}

impl std::fmt::Debug for PrivilegedForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedForwarder")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::traits::{PluginRequest, Role};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Echo(Result<PluginResponse, String>);

    #[async_trait]
    impl SignedRequestExecutor for Echo {
        async fn plugin_request(&self, _request: &PluginRequest) -> anyhow::Result<PluginResponse> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct FailingRoles;

    #[async_trait]
    impl RoleDirectory for FailingRoles {
        async fn roles(&self, _community_id: &str) -> anyhow::Result<Vec<Role>> {
            anyhow::bail!("roles unavailable")
        }
    }

    #[derive(Default)]
    struct Claims(Mutex<Vec<Role>>);

    impl RoleClaimedNotifier for Claims {
        fn role_claimed(&self, role: &Role) {
            self.0.lock().push(role.clone());
        }
    }

    fn forwarder(reply: Result<PluginResponse, String>, claims: Arc<Claims>) -> PrivilegedForwarder {
        PrivilegedForwarder {
            executor: Arc::new(Echo(reply)),
            roles: Arc::new(FailingRoles),
            notifier: claims,
            timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }

    fn request(signature: Option<&str>, action: Option<PrivilegedAction>) -> PrivilegedRequest {
        PrivilegedRequest {
            action,
            transport: PluginRequest {
                request: "{}".into(),
                signature: signature.map(str::to_string),
            },
        }
    }

    fn success() -> PluginResponse {
        PluginResponse {
            response: r#"{"data":{"success":true},"pluginId":"p1","requestId":"r1"}"#.into(),
            signature: Some("backend".into()),
        }
    }

    #[tokio::test]
    async fn empty_signature_is_missing() {
        let fwd = forwarder(Ok(success()), Arc::default());
        let err = fwd.forward("c1", "r1", &request(Some(""), None)).await.unwrap_err();
        assert_eq!(err, BridgeError::MissingSignature);
    }

    #[tokio::test]
    async fn executor_message_is_kept() {
        let fwd = forwarder(Err("NOT_ALLOWED".into()), Arc::default());
        let err = fwd.forward("c1", "r1", &request(Some("sig"), None)).await.unwrap_err();
        assert_eq!(err, BridgeError::Collaborator("NOT_ALLOWED".into()));
    }

    #[tokio::test]
    async fn role_lookup_failure_does_not_fail_the_request() {
        let claims = Arc::new(Claims::default());
        let fwd = forwarder(Ok(success()), claims.clone());
        let give = PrivilegedAction::GiveRole {
            role_id: "role-1".into(),
            user_id: "u1".into(),
        };
        let response = fwd
            .forward("c1", "r1", &request(Some("sig"), Some(give)))
            .await
            .unwrap();
        assert_eq!(response, success());
        assert!(claims.0.lock().is_empty());
    }
}
