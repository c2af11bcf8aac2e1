//! Error taxonomy for the plugin bridge.
//!
//! The `Display` text of every variant is the machine-readable code the
//! plugin sees in `{"error": "..."}`, so it must stay stable.

use thiserror::Error;

/// Fallback message when a collaborator fails without a usable message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Correlation token does not belong to the active session.
    #[error("UNKNOWN_IFRAME")]
    UnknownIframe,
    /// Message origin does not match the session's target origin.
    #[error("ORIGIN_MISMATCH")]
    OriginMismatch,
    /// Transport or inner request could not be parsed.
    #[error("MALFORMED_MESSAGE")]
    MalformedMessage,
    /// No plugin is mounted.
    #[error("NO_ACTIVE_SESSION")]
    NoActiveSession,
    #[error("MAX_REQUESTS_PER_MINUTE")]
    MaxRequestsPerMinute,
    #[error("MAX_NAVIGATES_PER_5_SECS")]
    MaxNavigatesPer5Secs,
    #[error("UNKNOWN_SAFE_REQUEST")]
    UnknownSafeRequest,
    /// Privileged request arrived without a signature to verify.
    #[error("MISSING_SIGNATURE")]
    MissingSignature,
    /// Backend did not answer within the forwarding deadline.
    #[error("REQUEST_TIMEOUT")]
    RequestTimeout,
    /// A collaborator failed; carries its message verbatim.
    #[error("{0}")]
    Collaborator(String),
}

impl BridgeError {
    /// Session errors are dropped without a reply: there is no trusted
    /// destination to answer to.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::UnknownIframe | Self::OriginMismatch | Self::MalformedMessage | Self::NoActiveSession
        )
    }

    /// Wrap a collaborator failure, keeping its top-level message.
    pub fn collaborator(err: &anyhow::Error) -> Self {
        let message = err.to_string();
        if message.trim().is_empty() {
            Self::Collaborator(UNKNOWN_ERROR.into())
        } else {
            Self::Collaborator(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_verbatim() {
        assert_eq!(BridgeError::UnknownIframe.to_string(), "UNKNOWN_IFRAME");
        assert_eq!(
            BridgeError::MaxNavigatesPer5Secs.to_string(),
            "MAX_NAVIGATES_PER_5_SECS"
        );
        assert_eq!(
            BridgeError::Collaborator("INVALID_SIGNATURE".into()).to_string(),
            "INVALID_SIGNATURE"
        );
    }

    #[test]
    fn only_session_errors_are_silent() {
        assert!(BridgeError::UnknownIframe.is_silent());
        assert!(BridgeError::OriginMismatch.is_silent());
        assert!(!BridgeError::MaxRequestsPerMinute.is_silent());
        assert!(!BridgeError::UnknownSafeRequest.is_silent());
        assert!(!BridgeError::RequestTimeout.is_silent());
    }

    #[test]
    fn empty_collaborator_message_falls_back() {
        let err = anyhow::anyhow!("");
        assert_eq!(
            BridgeError::collaborator(&err),
            BridgeError::Collaborator(UNKNOWN_ERROR.into())
        );
    }
}
