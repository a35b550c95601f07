//! Error type shared by the OAuth flows and the upload engine.

use std::net::SocketAddr;
use std::time::Duration;

/// Errors produced by `vimex`.
///
/// Authentication problems that only mean "no token this time" (missing grant, state mismatch,
/// non-2xx token responses) are absorbed by the authentication hook, which then sends the request
/// unauthenticated. Only errors for which [`Error::is_fatal`] holds escape the hook.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OAuth callback server could not bind its loopback port.
    #[error("bind OAuth callback server to {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The redirect reached the callback server but carried no code or token.
    #[error("no authorization grant: {0}")]
    GrantMissing(&'static str),

    /// The `state` echoed by the authorization server differs from the one we sent.
    #[error("authorization state does not match the state sent with the request")]
    StateMismatch,

    /// No redirect reached the callback server before its timeout.
    #[error("no authorization callback received within {0:?}")]
    GrantTimeout(Duration),

    /// Device-code polling ran past `expires_in` without success.
    #[error("polling {url} timed out after {expires_in:?}")]
    PollingTimeout { url: String, expires_in: Duration },

    /// The device authorization endpoint reported a terminal error such as `access_denied`.
    #[error("device authorization failed: {error}")]
    DeviceAuthorization { error: String },

    /// An upload request failed or its response lacked an expected field.
    ///
    /// `payload` holds the raw response body, when there was one.
    #[error("upload failed: {reason}")]
    Upload { reason: String, payload: String },

    /// An authentication flow was resumed with an event that does not belong to its protocol.
    #[error("authentication flow driven out of order: {0}")]
    Protocol(&'static str),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn upload(reason: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Upload {
            reason: reason.into(),
            payload: payload.into(),
        }
    }

    /// Whether the authentication hook must hand this error to its caller instead of sending the
    /// request without credentials.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. }
                | Self::GrantTimeout(_)
                | Self::PollingTimeout { .. }
                | Self::Protocol(_)
        )
    }
}
