//! Wire and data model types for the plugin iframe protocol.
//!
//! These types are serializable and mirror the JSON the plugin library
//! posts into the host window and expects back.

use serde::{Deserialize, Serialize};

use super::error::BridgeError;

// ── Plugin catalog data ─────────────────────────────────────────────────────

/// Named access right a plugin may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginPermission {
    ReadTwitter,
    ReadLukso,
    ReadFarcaster,
    ReadEmail,
    ReadFriends,
    AllowMicrophone,
    AllowCamera,
    /// Marker the catalog adds once the user accepted the plugin at all.
    UserAccepted,
}

/// Capability a plugin can ask the user for at runtime via `requestPermission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedPermission {
    Email,
    Twitter,
    Lukso,
    Farcaster,
    Friends,
}

impl RequestedPermission {
    /// Catalog permission this runtime capability maps to.
    pub fn permission(self) -> PluginPermission {
        match self {
            Self::Email => PluginPermission::ReadEmail,
            Self::Twitter => PluginPermission::ReadTwitter,
            Self::Lukso => PluginPermission::ReadLukso,
            Self::Farcaster => PluginPermission::ReadFarcaster,
            Self::Friends => PluginPermission::ReadFriends,
        }
    }

    /// Linked-account type backing this capability, if any.
    ///
    /// Email is backed by the verified address rather than a linked account,
    /// and friends needs nothing external.
    pub fn account_type(self) -> Option<&'static str> {
        match self {
            Self::Twitter => Some("twitter"),
            Self::Lukso => Some("lukso"),
            Self::Farcaster => Some("farcaster"),
            Self::Email | Self::Friends => None,
        }
    }
}

/// Permissions a plugin declares in its manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginPermissions {
    #[serde(default)]
    pub mandatory: Vec<PluginPermission>,
    #[serde(default)]
    pub optional: Vec<PluginPermission>,
}

impl PluginPermissions {
    pub fn declares(&self, permission: PluginPermission) -> bool {
        self.mandatory.contains(&permission) || self.optional.contains(&permission)
    }
}

/// Plugin-defined settings stored alongside the installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Whether the plugin may hand out roles at all
    #[serde(default)]
    pub can_give_role: bool,
    /// Role ids the plugin is allowed to assign
    #[serde(default)]
    pub giveable_role_ids: Vec<String>,
    /// Anything else the plugin stores in its config
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity and policy of one installed plugin instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Installation id, echoed in every response
    pub id: String,
    /// Community the plugin is installed in
    pub community_id: String,
    /// Configured URL, with or without scheme
    pub url: String,
    #[serde(default)]
    pub config: PluginConfig,
    #[serde(default)]
    pub permissions: PluginPermissions,
    /// Permissions the current user granted. `None` when never set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_permissions: Option<Vec<PluginPermission>>,
}

impl PluginDescriptor {
    pub fn has_accepted(&self, permission: PluginPermission) -> bool {
        self.accepted_permissions
            .as_deref()
            .is_some_and(|accepted| accepted.contains(&permission))
    }

    /// Role ids returned in the init handshake.
    pub fn assignable_role_ids(&self) -> Vec<String> {
        if self.config.can_give_role {
            self.config.giveable_role_ids.clone()
        } else {
            Vec::new()
        }
    }
}

/// Community role as resolved by the role lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub title: String,
}

/// External account linked to the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    #[serde(rename = "type")]
    pub account_type: String,
}

/// The signed-in user as far as the bridge needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub accounts: Vec<LinkedAccount>,
}

impl OwnUser {
    /// Whether the identity behind `capability` is already linked.
    pub fn has_account_for(&self, capability: RequestedPermission) -> bool {
        match capability {
            RequestedPermission::Email => self.email.is_some() && self.email_verified,
            RequestedPermission::Friends => true,
            other => other.account_type().is_some_and(|kind| {
                self.accounts
                    .iter()
                    .any(|account| account.account_type == kind)
            }),
        }
    }
}

// ── Inbound envelopes ───────────────────────────────────────────────────────

/// Transport envelope posted by the plugin.
///
/// `request` is the JSON-encoded inner request; the signature covers exactly
/// that string and is only required for privileged requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Fields common to every inner request, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    /// `safeRequest`, `request` or `action`
    #[serde(rename = "type")]
    pub kind: String,
    pub plugin_id: String,
    /// Caller-chosen, echoed back unchanged
    pub request_id: String,
    /// Correlation token of the session the plugin was mounted with
    pub iframe_uid: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub const SAFE_REQUEST_KIND: &str = "safeRequest";

/// Requests the host answers without the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SafeRequest {
    /// Startup handshake.
    Init,
    /// In-app path or external URL.
    Navigate { to: String },
    /// Capability escalation.
    RequestPermission { permission: RequestedPermission },
}

impl SafeRequest {
    /// Navigation and consent prompts are visible to the user and budgeted
    /// separately.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Navigate { .. } | Self::RequestPermission { .. })
    }
}

/// Privileged payload shapes the host recognises for side effects.
///
/// The bridge never acts on these beyond routing; the backend verifies and
/// executes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrivilegedAction {
    UserInfo,
    CommunityInfo,
    UserFriends { limit: u32, offset: u32 },
    #[serde(rename_all = "camelCase")]
    GiveRole { role_id: String, user_id: String },
}

/// Request forwarded verbatim to the signed-request executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedRequest {
    /// Best-effort reading of the payload; `None` for shapes the host does
    /// not know.
    pub action: Option<PrivilegedAction>,
    pub transport: PluginRequest,
}

/// A classified inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEnvelope {
    Safe(SafeRequest),
    Privileged(PrivilegedRequest),
}

impl RequestEnvelope {
    /// Classify an accepted request.
    pub fn classify(header: &RequestHeader, transport: &PluginRequest) -> Result<Self, BridgeError> {
        if header.kind == SAFE_REQUEST_KIND {
            let safe = serde_json::from_value::<SafeRequest>(header.data.clone())
                .map_err(|_| BridgeError::UnknownSafeRequest)?;
            return Ok(Self::Safe(safe));
        }

        Ok(Self::Privileged(PrivilegedRequest {
            action: serde_json::from_value(header.data.clone()).ok(),
            transport: transport.clone(),
        }))
    }
}

// ── Outbound envelopes ──────────────────────────────────────────────────────

/// Handshake payload for `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    pub plugin_id: String,
    pub assignable_role_ids: Vec<String>,
    pub user_id: String,
}

/// `data` field of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Error { error: String },
    Ack { ok: bool },
    Init(InitData),
    Business(serde_json::Value),
}

impl ResponseData {
    pub fn ack() -> Self {
        Self::Ack { ok: true }
    }

    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }
}

/// Inner response, JSON-encoded into [`PluginResponse::response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInner {
    pub data: ResponseData,
    pub plugin_id: String,
    pub request_id: String,
}

/// Response transport; signed only when it came from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl PluginResponse {
    /// Encode a host-generated (unsigned) response.
    pub fn unsigned(inner: &ResponseInner) -> Result<Self, serde_json::Error> {
        Ok(Self {
            response: serde_json::to_string(inner)?,
            signature: None,
        })
    }

    /// Whether the backend reported `data.success == true`.
    pub fn reports_success(&self) -> bool {
        serde_json::from_str::<serde_json::Value>(&self.response)
            .ok()
            .and_then(|value| value.pointer("/data/success").and_then(serde_json::Value::as_bool))
            .unwrap_or(false)
    }
}

/// Message posted into the iframe; `type` is the originating request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub request_id: String,
    pub payload: PluginResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: &str, data: serde_json::Value) -> RequestHeader {
        RequestHeader {
            kind: kind.into(),
            plugin_id: "p1".into(),
            request_id: "r1".into(),
            iframe_uid: "TOKEN".into(),
            data,
        }
    }

    fn transport() -> PluginRequest {
        PluginRequest {
            request: "{}".into(),
            signature: Some("sig".into()),
        }
    }

    #[test]
    fn header_parses_camel_case_fields() {
        let raw = r#"{"type":"safeRequest","pluginId":"p1","requestId":"r1","iframeUid":"ABC","data":{"type":"init"}}"#;
        let parsed: RequestHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.kind, "safeRequest");
        assert_eq!(parsed.iframe_uid, "ABC");
        assert_eq!(parsed.request_id, "r1");
    }

    #[test]
    fn classifies_safe_requests() {
        let nav = header("safeRequest", serde_json::json!({"type": "navigate", "to": "/c/x"}));
        assert_eq!(
            RequestEnvelope::classify(&nav, &transport()).unwrap(),
            RequestEnvelope::Safe(SafeRequest::Navigate { to: "/c/x".into() })
        );

        let perm = header(
            "safeRequest",
            serde_json::json!({"type": "requestPermission", "permission": "twitter"}),
        );
        assert_eq!(
            RequestEnvelope::classify(&perm, &transport()).unwrap(),
            RequestEnvelope::Safe(SafeRequest::RequestPermission {
                permission: RequestedPermission::Twitter
            })
        );
    }

    #[test]
    fn unknown_safe_subtype_is_rejected() {
        let bogus = header("safeRequest", serde_json::json!({"type": "selfDestruct"}));
        assert_eq!(
            RequestEnvelope::classify(&bogus, &transport()),
            Err(BridgeError::UnknownSafeRequest)
        );

        let bad_permission = header(
            "safeRequest",
            serde_json::json!({"type": "requestPermission", "permission": "discord"}),
        );
        assert_eq!(
            RequestEnvelope::classify(&bad_permission, &transport()),
            Err(BridgeError::UnknownSafeRequest)
        );
    }

    #[test]
    fn privileged_give_role_is_recognised() {
        let give = header(
            "action",
            serde_json::json!({"type": "giveRole", "roleId": "role-1", "userId": "u1"}),
        );
        let RequestEnvelope::Privileged(req) = RequestEnvelope::classify(&give, &transport()).unwrap()
        else {
            panic!("expected privileged");
        };
        assert_eq!(
            req.action,
            Some(PrivilegedAction::GiveRole {
                role_id: "role-1".into(),
                user_id: "u1".into()
            })
        );
        assert_eq!(req.transport.signature.as_deref(), Some("sig"));
    }

    #[test]
    fn unknown_privileged_shape_still_forwards() {
        let odd = header("request", serde_json::json!({"type": "somethingNew"}));
        let RequestEnvelope::Privileged(req) = RequestEnvelope::classify(&odd, &transport()).unwrap()
        else {
            panic!("expected privileged");
        };
        assert!(req.action.is_none());
    }

    #[test]
    fn init_response_serializes_like_the_plugin_library_expects() {
        let inner = ResponseInner {
            data: ResponseData::Init(InitData {
                plugin_id: "p1".into(),
                assignable_role_ids: vec![],
                user_id: "u1".into(),
            }),
            plugin_id: "p1".into(),
            request_id: "r1".into(),
        };
        let value = serde_json::to_value(&inner).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "data": {"pluginId": "p1", "assignableRoleIds": [], "userId": "u1"},
                "pluginId": "p1",
                "requestId": "r1"
            })
        );
    }

    #[test]
    fn outbound_message_uses_request_id_as_type() {
        let msg = OutboundMessage {
            request_id: "r9".into(),
            payload: PluginResponse {
                response: "{}".into(),
                signature: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"r9\""));
        assert!(!json.contains("signature"));
    }

    #[test]
    fn detects_backend_success() {
        let ok = PluginResponse {
            response: r#"{"data":{"success":true},"pluginId":"p","requestId":"r"}"#.into(),
            signature: Some("s".into()),
        };
        let failed = PluginResponse {
            response: r#"{"data":{"success":false},"pluginId":"p","requestId":"r"}"#.into(),
            signature: Some("s".into()),
        };
        assert!(ok.reports_success());
        assert!(!failed.reports_success());
    }

    #[test]
    fn account_linkage_rules() {
        let mut user = OwnUser {
            id: "u1".into(),
            email: Some("a@b.c".into()),
            email_verified: false,
            accounts: vec![LinkedAccount {
                account_type: "lukso".into(),
            }],
        };
        assert!(!user.has_account_for(RequestedPermission::Email));
        user.email_verified = true;
        assert!(user.has_account_for(RequestedPermission::Email));
        assert!(user.has_account_for(RequestedPermission::Lukso));
        assert!(!user.has_account_for(RequestedPermission::Twitter));
        assert!(user.has_account_for(RequestedPermission::Friends));
    }

    #[test]
    fn descriptor_parses_catalog_json() {
        let raw = r#"{
            "id": "p1",
            "communityId": "c1",
            "url": "plugin.example.com",
            "config": {"canGiveRole": true, "giveableRoleIds": ["r1"], "theme": "x"},
            "permissions": {"mandatory": ["READ_EMAIL"], "optional": []},
            "acceptedPermissions": ["USER_ACCEPTED", "READ_EMAIL"]
        }"#;
        let descriptor: PluginDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(descriptor.assignable_role_ids(), vec!["r1".to_string()]);
        assert!(descriptor.has_accepted(PluginPermission::UserAccepted));
        assert!(descriptor.has_accepted(PluginPermission::ReadEmail));
        assert!(descriptor.permissions.declares(PluginPermission::ReadEmail));
        assert!(descriptor.config.extra.contains_key("theme"));
    }
}
