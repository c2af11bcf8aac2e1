//! Session registry for the mounted plugin iframe.
//!
//! Exactly one session is live at a time. Mounting a different plugin (by id
//! or origin) replaces it, which also discards its quotas and invalidates
//! every in-flight request tied to the old correlation token.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use url::Url;

use crate::config::{RateLimitConfig, SessionConfig};

use super::rate_limit::RateLimiter;
use super::traits::{PluginDescriptor, PluginPermission};

/// Characters used for correlation tokens (no 0/O, 1/I ambiguity).
pub const TOKEN_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// `sandbox` attribute applied to every plugin iframe.
pub const IFRAME_SANDBOX: &str =
    "allow-scripts allow-same-origin allow-forms allow-pointer-lock allow-downloads";

const BASE_ALLOW: &str = "cross-origin-isolated; web-share; clipboard-read; clipboard-write";

/// Host colour scheme forwarded to the plugin on mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Dark,
    #[default]
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

/// Mint a fresh correlation token.
pub fn mint_correlation_token(len: usize) -> String {
    // The alphabet has 32 entries, so masking a random byte stays uniform.
    (0..len)
        .map(|_| char::from(TOKEN_ALPHABET[usize::from(rand::random::<u8>() & 31)]))
        .collect()
}

/// Turn a configured plugin URL into an absolute one.
pub fn normalize_plugin_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("Plugin URL is empty");
    }
    let absolute = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&absolute).with_context(|| format!("Invalid plugin URL: {raw}"))
}

/// Everything the host needs to render the iframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    pub iframe_url: String,
    pub target_origin: String,
    pub correlation_token: String,
    pub sandbox: &'static str,
    pub allow: String,
}

/// One mounted iframe.
#[derive(Debug, Clone)]
pub struct IframeSession {
    correlation_token: String,
    target_origin: String,
    base_url: Url,
    theme: Theme,
    descriptor: PluginDescriptor,
    limiter: RateLimiter,
}

impl IframeSession {
    pub fn create(
        descriptor: PluginDescriptor,
        theme: Theme,
        session: &SessionConfig,
        limits: &RateLimitConfig,
    ) -> Result<Self> {
        let base_url = normalize_plugin_url(&descriptor.url)?;
        let target_origin = base_url.origin().ascii_serialization();
        if target_origin == "null" {
            anyhow::bail!("Plugin URL has no usable origin: {}", descriptor.url);
        }

        Ok(Self {
            correlation_token: mint_correlation_token(session.token_length),
            target_origin,
            base_url,
            theme,
            descriptor,
            limiter: RateLimiter::new(limits),
        })
    }

    pub fn correlation_token(&self) -> &str {
        &self.correlation_token
    }

    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    pub fn plugin_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut PluginDescriptor {
        &mut self.descriptor
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// URL actually loaded into the iframe.
    pub fn iframe_url(&self, session: &SessionConfig) -> String {
        let background = match self.theme {
            Theme::Dark => &session.dark_background,
            Theme::Light => &session.light_background,
        };
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("iframeUid", &self.correlation_token)
            .append_pair("cg_theme", self.theme.as_str())
            .append_pair("cg_bg_color", background);
        url.to_string()
    }

    /// Feature-policy `allow` attribute for the iframe.
    ///
    /// Microphone and camera are delegated to the plugin origin only once the
    /// user accepted them.
    pub fn allow_attribute(&self) -> String {
        if self.descriptor.accepted_permissions.is_none() {
            return BASE_ALLOW.to_string();
        }
        let delegate = |permission| {
            if self.descriptor.has_accepted(permission) {
                self.target_origin.as_str()
            } else {
                "'none'"
            }
        };
        format!(
            "{BASE_ALLOW}; microphone {}; camera {}",
            delegate(PluginPermission::AllowMicrophone),
            delegate(PluginPermission::AllowCamera)
        )
    }

    pub fn mount_info(&self, session: &SessionConfig) -> MountInfo {
        MountInfo {
            iframe_url: self.iframe_url(session),
            target_origin: self.target_origin.clone(),
            correlation_token: self.correlation_token.clone(),
            sandbox: IFRAME_SANDBOX,
            allow: self.allow_attribute(),
        }
    }

    fn same_plugin(&self, other: &PluginDescriptor, other_origin: &str) -> bool {
        self.descriptor.id == other.id && self.target_origin == other_origin
    }
}

/// Holder of the single live session.
pub struct SessionRegistry {
    current: RwLock<Option<IframeSession>>,
    session_config: SessionConfig,
    limits: RateLimitConfig,
}

impl SessionRegistry {
    pub fn new(session_config: SessionConfig, limits: RateLimitConfig) -> Self {
        Self {
            current: RwLock::new(None),
            session_config,
            limits,
        }
    }

    /// Mount `descriptor`, replacing any other plugin.
    ///
    /// Re-mounting the same plugin (same id and origin) keeps its token and
    /// quotas and only refreshes the URL, descriptor and theme.
    pub fn load(&self, descriptor: PluginDescriptor, theme: Theme) -> Result<MountInfo> {
        let base_url = normalize_plugin_url(&descriptor.url)?;
        let origin = base_url.origin().ascii_serialization();

        let mut current = self.current.write();
        if let Some(session) = current.as_mut() {
            if session.same_plugin(&descriptor, &origin) {
                session.base_url = base_url;
                session.descriptor = descriptor;
                session.theme = theme;
                tracing::debug!(
                    plugin_id = %session.plugin_id(),
                    "Refreshed mounted plugin session"
                );
                return Ok(session.mount_info(&self.session_config));
            }
        }

        let session = IframeSession::create(descriptor, theme, &self.session_config, &self.limits)?;
        if let Some(old) = current.as_ref() {
            tracing::info!(
                plugin_id = %old.plugin_id(),
                "Discarding plugin session"
            );
        }
        tracing::info!(
            plugin_id = %session.plugin_id(),
            origin = %session.target_origin(),
            "Created plugin session"
        );
        let info = session.mount_info(&self.session_config);
        *current = Some(session);
        Ok(info)
    }

    /// Tear down the live session, if any.
    pub fn unload(&self) -> Option<IframeSession> {
        let old = self.current.write().take();
        if let Some(session) = old.as_ref() {
            tracing::info!(plugin_id = %session.plugin_id(), "Unloaded plugin session");
        }
        old
    }

    pub fn set_theme(&self, theme: Theme) -> Option<MountInfo> {
        let mut current = self.current.write();
        let session = current.as_mut()?;
        session.theme = theme;
        Some(session.mount_info(&self.session_config))
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn current_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|session| session.correlation_token.clone())
    }

    /// Whether `token` still names the live session.
    pub fn is_current(&self, token: &str) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|session| session.correlation_token == token)
    }

    pub fn mount_info(&self) -> Option<MountInfo> {
        self.current
            .read()
            .as_ref()
            .map(|session| session.mount_info(&self.session_config))
    }

    /// Run `f` against the live session under the write lock.
    ///
    /// Never call this across an `.await`.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut IframeSession) -> R) -> Option<R> {
        self.current.write().as_mut().map(f)
    }

    pub fn snapshot(&self) -> Option<IframeSession> {
        self.current.read().clone()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read();
        f.debug_struct("SessionRegistry")
            .field("plugin_id", &current.as_ref().map(IframeSession::plugin_id))
            .field(
                "target_origin",
                &current.as_ref().map(IframeSession::target_origin),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::traits::{PluginConfig, PluginPermissions};

    fn descriptor(id: &str, url: &str) -> PluginDescriptor {
        PluginDescriptor {
            id: id.into(),
            community_id: "c1".into(),
            url: url.into(),
            config: PluginConfig::default(),
            permissions: PluginPermissions::default(),
            accepted_permissions: None,
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionConfig::default(), RateLimitConfig::default())
    }

    #[test]
    fn tokens_use_fixed_alphabet_and_length() {
        let token = mint_correlation_token(10);
        assert_eq!(token.len(), 10);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        assert_ne!(mint_correlation_token(10), mint_correlation_token(10));
    }

    #[test]
    fn schemeless_urls_get_https() {
        let url = normalize_plugin_url("plugin.example.com/app").unwrap();
        assert_eq!(url.as_str(), "https://plugin.example.com/app");
        assert_eq!(url.origin().ascii_serialization(), "https://plugin.example.com");

        let url = normalize_plugin_url("http://localhost:3000").unwrap();
        assert_eq!(url.origin().ascii_serialization(), "http://localhost:3000");
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(normalize_plugin_url("  ").is_err());
    }

    #[test]
    fn iframe_url_carries_token_and_theme() {
        let registry = registry();
        let info = registry
            .load(descriptor("p1", "plugin.example.com/app?x=1"), Theme::Dark)
            .unwrap();
        let url = Url::parse(&info.iframe_url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("x".into(), "1".into())));
        assert!(pairs.contains(&("iframeUid".into(), info.correlation_token.clone())));
        assert!(pairs.contains(&("cg_theme".into(), "dark".into())));
        assert!(pairs.contains(&("cg_bg_color".into(), "#161820".into())));
        assert_eq!(info.target_origin, "https://plugin.example.com");
        assert_eq!(info.sandbox, IFRAME_SANDBOX);
    }

    #[test]
    fn switching_plugins_mints_new_session() {
        let registry = registry();
        let first = registry.load(descriptor("p1", "a.example.com"), Theme::Light).unwrap();
        registry.with_session(|s| s.limiter_mut().check_general(0)).unwrap().unwrap();

        let second = registry.load(descriptor("p2", "b.example.com"), Theme::Light).unwrap();
        assert_ne!(first.correlation_token, second.correlation_token);
        assert!(!registry.is_current(&first.correlation_token));
        assert_eq!(
            registry.with_session(|s| s.limiter().general_in_window()),
            Some(0)
        );
    }

    #[test]
    fn remounting_same_plugin_keeps_token() {
        let registry = registry();
        let first = registry.load(descriptor("p1", "a.example.com"), Theme::Light).unwrap();
        let again = registry.load(descriptor("p1", "https://a.example.com"), Theme::Dark).unwrap();
        assert_eq!(first.correlation_token, again.correlation_token);
        assert!(again.iframe_url.contains("cg_theme=dark"));
    }

    #[test]
    fn remounting_same_plugin_picks_up_new_path() {
        let registry = registry();
        let first = registry.load(descriptor("p1", "plugin.example.com/v1"), Theme::Light).unwrap();
        let again = registry.load(descriptor("p1", "plugin.example.com/v2"), Theme::Light).unwrap();
        assert_eq!(first.correlation_token, again.correlation_token);
        let url = Url::parse(&again.iframe_url).unwrap();
        assert_eq!(url.path(), "/v2");
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "iframeUid" && v == first.correlation_token));
    }

    #[test]
    fn unload_clears_session() {
        let registry = registry();
        let info = registry.load(descriptor("p1", "a.example.com"), Theme::Light).unwrap();
        assert!(registry.unload().is_some());
        assert!(!registry.is_active());
        assert!(!registry.is_current(&info.correlation_token));
    }

    #[test]
    fn allow_attribute_follows_accepted_permissions() {
        let registry = registry();
        let info = registry.load(descriptor("p1", "a.example.com"), Theme::Light).unwrap();
        assert_eq!(info.allow, BASE_ALLOW);

        let mut with_mic = descriptor("p1", "a.example.com");
        with_mic.accepted_permissions = Some(vec![PluginPermission::AllowMicrophone]);
        let info = registry.load(with_mic, Theme::Light).unwrap();
        assert!(info.allow.ends_with("microphone https://a.example.com; camera 'none'"));
    }
}
