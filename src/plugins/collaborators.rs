//! Host-side seams the bridge talks to.
//!
//! Everything outside the protocol core (the backend RPC, navigation, modal
//! UI, the plugin catalog) is reached through these traits so the bridge can
//! be embedded in any host and driven by fakes in tests.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use super::rate_limit::{Clock, SystemClock};
use super::traits::{
    OutboundMessage, OwnUser, PluginPermission, PluginRequest, PluginResponse, RequestedPermission,
    Role,
};

/// Backend endpoint that verifies the plugin signature and executes the
/// privileged action. Errors carry the message relayed to the plugin.
#[async_trait]
pub trait SignedRequestExecutor: Send + Sync {
    async fn plugin_request(&self, request: &PluginRequest) -> Result<PluginResponse>;
}

/// Classifies navigation targets; returns the in-app path for local URLs.
pub trait UrlClassifier: Send + Sync {
    fn is_local_url(&self, url: &str) -> Option<String>;
}

/// Client-side router.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Confirmation dialog shown before leaving for an external URL.
pub trait ExternalLinkPrompt: Send + Sync {
    fn show_modal(&self, url: &str);
}

/// Consent dialog for a pending capability.
pub trait ConsentPrompt: Send + Sync {
    fn show_permission_prompt(&self, capability: RequestedPermission);
}

/// Opens account settings on the linking page for a provider.
pub trait IdentityLinker: Send + Sync {
    fn open_account_linking(&self, capability: RequestedPermission);
}

/// Plugin catalog persistence.
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn accept_plugin_permissions(
        &self,
        plugin_id: &str,
        permissions: &[PluginPermission],
    ) -> Result<()>;
}

/// Community role lookup.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles(&self, community_id: &str) -> Result<Vec<Role>>;
}

/// "Role claimed" notification.
pub trait RoleClaimedNotifier: Send + Sync {
    fn role_claimed(&self, role: &Role);
}

/// Signed-in user.
pub trait UserContext: Send + Sync {
    fn own_user(&self) -> Option<OwnUser>;
}

/// `postMessage` into the iframe's window, restricted to `target_origin`.
pub trait ResponseSink: Send + Sync {
    fn post_message(&self, message: &OutboundMessage, target_origin: &str);
}

/// Bundle of collaborators handed to the bridge.
#[derive(Clone)]
pub struct HostServices {
    pub executor: Arc<dyn SignedRequestExecutor>,
    pub url_classifier: Arc<dyn UrlClassifier>,
    pub navigator: Arc<dyn Navigator>,
    pub external_links: Arc<dyn ExternalLinkPrompt>,
    pub consent: Arc<dyn ConsentPrompt>,
    pub identity_linker: Arc<dyn IdentityLinker>,
    pub plugin_store: Arc<dyn PluginStore>,
    pub roles: Arc<dyn RoleDirectory>,
    pub role_notifier: Arc<dyn RoleClaimedNotifier>,
    pub user: Arc<dyn UserContext>,
    pub sink: Arc<dyn ResponseSink>,
    pub clock: Arc<dyn Clock>,
}

impl HostServices {
    /// Same collaborators with a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn system_clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

/// URL classifier for a host served from a known set of hostnames.
///
/// Root-relative paths and absolute URLs on one of `hosts` are local; the
/// returned path keeps query and fragment.
#[derive(Debug, Clone, Default)]
pub struct HostUrlClassifier {
    hosts: Vec<String>,
}

impl HostUrlClassifier {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl UrlClassifier for HostUrlClassifier {
    fn is_local_url(&self, url: &str) -> Option<String> {
        // `//host` and `/\host` are protocol-relative in browsers.
        if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") {
            return Some(url.to_string());
        }

        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.to_ascii_lowercase();
        if !self.hosts.iter().any(|known| *known == host) {
            return None;
        }

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        if let Some(fragment) = parsed.fragment() {
            path.push('#');
            path.push_str(fragment);
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_are_local() {
        let classifier = HostUrlClassifier::new(["app.example.com"]);
        assert_eq!(classifier.is_local_url("/c/dao/plugin"), Some("/c/dao/plugin".into()));
        assert_eq!(classifier.is_local_url("//evil.com/x"), None);
        assert_eq!(classifier.is_local_url("/\\evil.com/x"), None);
    }

    #[test]
    fn known_hosts_are_local() {
        let classifier = HostUrlClassifier::new(["App.Example.com"]);
        assert_eq!(
            classifier.is_local_url("https://app.example.com/c/dao?tab=1#top"),
            Some("/c/dao?tab=1#top".into())
        );
    }

    #[test]
    fn other_urls_are_external() {
        let classifier = HostUrlClassifier::new(["app.example.com"]);
        assert_eq!(classifier.is_local_url("https://phish.example.net/login"), None);
        assert_eq!(classifier.is_local_url("javascript:alert(1)"), None);
        assert_eq!(classifier.is_local_url("not a url"), None);
    }
}
