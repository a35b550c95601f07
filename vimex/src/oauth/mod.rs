//! OAuth 2.0 credential acquisition for the Vimeo API.
//!
//! Four grant flows are supported, each a variant of [`Flow`]:
//!
//! - [`ClientCredentialsFlow`]: app-only token, no user involvement.
//! - [`AuthorizationCodeFlow`]: the user approves in a browser, Vimeo redirects to a loopback
//!   [`CallbackServer`] with a code, and the code is exchanged for a token.
//! - [`ImplicitGrantFlow`]: like the code flow, but the token arrives directly in the redirect.
//! - [`DeviceCodeFlow`]: the user enters a code on another device while we poll for the token.
//!
//! Acquisition is written once, as a transport-neutral state machine ([`Step`] / [`Event`]), and
//! driven either asynchronously ([`Flow::get_token`]) or on the calling thread
//! ([`Flow::get_token_blocking`]). Both drivers produce the same token for the same responses.
//!
//! A flow caches the first token it acquires for the rest of its lifetime. Failed acquisitions
//! are never cached, so the next request tries again.

use crate::config::API_ACCEPT;
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub mod flows;
pub mod poll;
pub mod server;

pub use flows::{
    AuthorizationCodeFlow, ClientCredentialsFlow, DEFAULT_POLL_INTERVAL, DeviceCodeFlow,
    DeviceCodeGrantResponse, Event, Flow, ImplicitGrantFlow, Step,
};
pub use poll::{PollRequest, poll_authorize_url, poll_authorize_url_blocking};
pub use server::{CallbackMode, CallbackServer, FlowResult, GrantFuture, GrantReceiver};

/// Scope requested by the user-facing flows unless configured otherwise.
pub const DEFAULT_SCOPE: &str = "public private";

/// Scope requested by the client-credentials flow.
pub const CLIENT_CREDENTIALS_SCOPE: &str = "public";

/// An application's OAuth client identifier and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The value of the `Authorization` header that authenticates the application itself.
    ///
    /// Vimeo expects the lowercase `basic` scheme.
    pub fn basic_authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        format!("basic {encoded}")
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// An opaque bearer token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Formats the token as an `Authorization` header value.
    ///
    /// Fails if the token contains bytes that are not allowed in a header.
    pub fn bearer_header(&self) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
        let mut value = HeaderValue::try_from(format!("Bearer {}", self.0))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// The OAuth grant a flow uses.
///
/// Only tags request bodies and authorization URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    Implicit,
    DeviceGrant,
}

impl GrantType {
    /// The `grant_type` value sent to token endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
            GrantType::DeviceGrant => "device_grant",
        }
    }

    /// The `response_type` of the authorization URL, for grants that redirect through a browser.
    pub fn response_type(&self) -> Option<&'static str> {
        match self {
            GrantType::AuthorizationCode => Some("code"),
            GrantType::Implicit => Some("token"),
            GrantType::ClientCredentials | GrantType::DeviceGrant => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A form-encoded POST to a token endpoint, described independently of the HTTP client that
/// will send it.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub form: Vec<(&'static str, String)>,
}

impl TokenRequest {
    /// A request authenticated as the application, accepting the pinned API version.
    pub(crate) fn new(url: Url, credentials: &ClientCredentials) -> Self {
        let mut headers = HeaderMap::new();
        let mut basic = HeaderValue::try_from(credentials.basic_authorization())
            .expect("base64 output is always a valid header value");
        basic.set_sensitive(true);
        headers.insert(AUTHORIZATION, basic);
        headers.insert(ACCEPT, HeaderValue::from_static(API_ACCEPT));
        Self {
            url,
            headers,
            form: Vec::new(),
        }
    }

    pub(crate) fn field(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.form.push((name, value.into()));
        self
    }

    pub(crate) fn to_async(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        http.post(self.url.clone())
            .headers(self.headers.clone())
            .form(&self.form)
    }

    pub(crate) fn to_blocking(
        &self,
        http: &reqwest::blocking::Client,
    ) -> reqwest::blocking::RequestBuilder {
        http.post(self.url.clone())
            .headers(self.headers.clone())
            .form(&self.form)
    }
}

/// The status and body of a token endpoint response.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TokenResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let body = response.bytes().await?;
        Ok(Self { status, body })
    }

    pub(crate) fn read_blocking(response: reqwest::blocking::Response) -> Result<Self> {
        let status = response.status();
        let body = response.bytes()?;
        Ok(Self { status, body })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Extracts a non-empty `access_token` field from a successful response.
    pub fn access_token(&self) -> Option<AccessToken> {
        #[derive(Deserialize)]
        struct Body {
            access_token: Option<String>,
        }

        if !self.is_success() {
            tracing::debug!(
                status = %self.status,
                body = %String::from_utf8_lossy(&self.body),
                "token endpoint rejected the request"
            );
            return None;
        }
        match self.json::<Body>() {
            Ok(Body {
                access_token: Some(token),
            }) if !token.is_empty() => Some(AccessToken(token)),
            Ok(_) => {
                tracing::warn!("token response carries no access_token");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "token response is not valid JSON");
                None
            }
        }
    }
}
