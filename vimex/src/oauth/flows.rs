//! The four grant flows and the drivers that run them.
//!
//! Every acquisition is a short conversation between a flow and its driver. The flow says what
//! it needs next as a [`Step`]; the driver performs it (opening the browser, sending a token
//! request, polling) and resumes the flow with the matching [`Event`]:
//!
//! ```text
//! client credentials:  Send ─Responded→ Done
//! authorization code:  Authorize ─Granted→ Send ─Responded→ Done
//! implicit:            Authorize ─Granted→ Done
//! device grant:        Send ─Responded→ Poll ─Polled→ Done
//! ```
//!
//! Any step can end early in `Done(None)`: a rejected request, a missing grant, or a `state`
//! that does not match. The flow itself never touches the network, so the async and the blocking
//! driver make the same decisions for the same responses.

use super::poll::{self, PollRequest};
use super::server::{CallbackMode, CallbackServer, DEFAULT_PORT, FlowResult, GrantReceiver};
use super::{
    AccessToken, CLIENT_CREDENTIALS_SCOPE, ClientCredentials, DEFAULT_SCOPE, GrantType,
    TokenRequest, TokenResponse,
};
use crate::config::Endpoints;
use crate::error::{Error, Result};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// What a flow needs from its driver next.
#[derive(Debug)]
pub enum Step {
    /// Send the user to this authorization URL and resume with [`Event::Granted`].
    Authorize(Url),
    /// Send this request and resume with [`Event::Responded`].
    Send(TokenRequest),
    /// Poll with this request and resume with [`Event::Polled`].
    Poll(PollRequest),
    /// The acquisition is over, with or without a token.
    Done(Option<AccessToken>),
}

/// The outcome of a [`Step`], handed back to the flow.
#[derive(Debug)]
pub enum Event {
    Granted(FlowResult),
    Responded(TokenResponse),
    Polled(TokenResponse),
}

/// The event a flow is waiting for, given the step it last handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    /// No acquisition in progress; [`Flow::start`] must come first.
    #[default]
    Idle,
    Granting,
    Responding,
    Polling,
}

impl Phase {
    fn after(step: &Step) -> Self {
        match step {
            Step::Authorize(_) => Phase::Granting,
            Step::Send(_) => Phase::Responding,
            Step::Poll(_) => Phase::Polling,
            Step::Done(_) => Phase::Idle,
        }
    }

    fn accepts(self, event: &Event) -> bool {
        matches!(
            (self, event),
            (Phase::Granting, Event::Granted(_))
                | (Phase::Responding, Event::Responded(_))
                | (Phase::Polling, Event::Polled(_))
        )
    }
}

/// Polling interval used when the device endpoint names none (RFC 8628 §3.2).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The body of the device endpoint's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeGrantResponse {
    pub device_code: String,
    pub user_code: String,
    pub authorize_link: String,
    pub activate_link: String,
    /// Seconds until the codes expire.
    pub expires_in: u64,
    /// Seconds to wait between polls; zero when the server names none.
    #[serde(default)]
    pub interval: u64,
}

type Instructions = Arc<dyn Fn(&DeviceCodeGrantResponse) + Send + Sync>;

/// Returns the grant if it is present and arrived with the state we sent.
fn verify_grant(
    expected_state: &str,
    received_state: Option<&str>,
    grant: Option<String>,
) -> Result<String> {
    let grant = grant
        .filter(|grant| !grant.is_empty())
        .ok_or(Error::GrantMissing("redirect carried no grant"))?;
    if received_state != Some(expected_state) {
        return Err(Error::StateMismatch);
    }
    Ok(grant)
}

fn authorization_url(
    base: &Url,
    grant: GrantType,
    credentials: &ClientCredentials,
    redirect_uri: &str,
    state: &str,
    scope: &str,
) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("response_type", grant.response_type().unwrap_or("code"))
        .append_pair("client_id", credentials.client_id())
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("scope", scope);
    url
}

fn random_state() -> String {
    oauth2::CsrfToken::new_random().secret().clone()
}

fn join_scopes<I, S>(scopes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let scopes: Vec<_> = scopes
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    if scopes.is_empty() {
        DEFAULT_SCOPE.to_string()
    } else {
        scopes.join(" ")
    }
}

/// App-only token via the client-credentials grant.
#[derive(Debug, Clone)]
pub struct ClientCredentialsFlow {
    credentials: ClientCredentials,
    token_url: Url,
    access_token: Option<AccessToken>,
    phase: Phase,
}

impl ClientCredentialsFlow {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials,
            token_url: Endpoints::default().client_credentials,
            access_token: None,
            phase: Phase::Idle,
        }
    }

    pub fn with_endpoints(mut self, endpoints: &Endpoints) -> Self {
        self.token_url = endpoints.client_credentials.clone();
        self
    }

    /// Starts out with a token obtained earlier; no request will ever be made.
    pub fn with_access_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn start(&self) -> Step {
        Step::Send(
            TokenRequest::new(self.token_url.clone(), &self.credentials)
                .field("grant_type", GrantType::ClientCredentials.as_str())
                .field("scope", CLIENT_CREDENTIALS_SCOPE),
        )
    }

    fn advance(&self, event: Event) -> Result<Step> {
        match event {
            Event::Responded(response) => Ok(Step::Done(response.access_token())),
            Event::Granted(_) | Event::Polled(_) => Err(Error::Protocol(
                "client credentials flow only sends a token request",
            )),
        }
    }
}

/// User token via a browser redirect carrying a code, exchanged for a token.
#[derive(Debug)]
pub struct AuthorizationCodeFlow {
    credentials: ClientCredentials,
    state: String,
    scope: String,
    redirect_uri: String,
    authorize_url: Url,
    exchange_url: Url,
    receiver: Box<dyn GrantReceiver>,
    access_token: Option<AccessToken>,
    phase: Phase,
}

impl AuthorizationCodeFlow {
    /// A flow that sends `state` with the authorization request and only accepts a redirect that
    /// echoes it.
    pub fn new(credentials: ClientCredentials, state: impl Into<String>) -> Self {
        let server = CallbackServer::new(DEFAULT_PORT, CallbackMode::Query);
        let endpoints = Endpoints::default();
        Self {
            credentials,
            state: state.into(),
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri: server.redirect_uri(),
            authorize_url: endpoints.authorize,
            exchange_url: endpoints.access_token,
            receiver: Box::new(server),
            access_token: None,
            phase: Phase::Idle,
        }
    }

    /// Like [`Self::new`] with a freshly generated random `state`.
    pub fn with_random_state(credentials: ClientCredentials) -> Self {
        Self::new(credentials, random_state())
    }

    /// Requests these scopes instead of `public private`.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope = join_scopes(scopes);
        self
    }

    /// Listens for the redirect on another loopback port.
    pub fn with_port(self, port: u16) -> Self {
        self.with_callback_server(CallbackServer::new(port, CallbackMode::Query))
    }

    pub fn with_callback_server(mut self, server: CallbackServer) -> Self {
        self.redirect_uri = server.redirect_uri();
        self.receiver = Box::new(server);
        self
    }

    /// Obtains the grant from `receiver` instead of a loopback server.
    pub fn with_receiver(
        mut self,
        redirect_uri: impl Into<String>,
        receiver: impl GrantReceiver + 'static,
    ) -> Self {
        self.redirect_uri = redirect_uri.into();
        self.receiver = Box::new(receiver);
        self
    }

    pub fn with_endpoints(mut self, endpoints: &Endpoints) -> Self {
        self.authorize_url = endpoints.authorize.clone();
        self.exchange_url = endpoints.access_token.clone();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// The page the user is sent to.
    pub fn authorization_url(&self) -> Url {
        authorization_url(
            &self.authorize_url,
            GrantType::AuthorizationCode,
            &self.credentials,
            &self.redirect_uri,
            &self.state,
            &self.scope,
        )
    }

    fn start(&self) -> Step {
        Step::Authorize(self.authorization_url())
    }

    fn advance(&self, event: Event) -> Result<Step> {
        match event {
            Event::Granted(result) => {
                match verify_grant(&self.state, result.received_state.as_deref(), result.code) {
                    Ok(code) => Ok(Step::Send(
                        TokenRequest::new(self.exchange_url.clone(), &self.credentials)
                            .field("grant_type", GrantType::AuthorizationCode.as_str())
                            .field("code", code)
                            .field("redirect_uri", self.redirect_uri.clone()),
                    )),
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding authorization grant");
                        Ok(Step::Done(None))
                    }
                }
            }
            Event::Responded(response) => Ok(Step::Done(response.access_token())),
            Event::Polled(_) => Err(Error::Protocol("authorization code flow does not poll")),
        }
    }
}

/// User token delivered directly in the browser redirect.
#[derive(Debug)]
pub struct ImplicitGrantFlow {
    credentials: ClientCredentials,
    state: String,
    scope: String,
    redirect_uri: String,
    authorize_url: Url,
    receiver: Box<dyn GrantReceiver>,
    access_token: Option<AccessToken>,
    phase: Phase,
}

impl ImplicitGrantFlow {
    pub fn new(credentials: ClientCredentials, state: impl Into<String>) -> Self {
        let server = CallbackServer::new(DEFAULT_PORT, CallbackMode::Fragment);
        Self {
            credentials,
            state: state.into(),
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri: server.redirect_uri(),
            authorize_url: Endpoints::default().authorize,
            receiver: Box::new(server),
            access_token: None,
            phase: Phase::Idle,
        }
    }

    pub fn with_random_state(credentials: ClientCredentials) -> Self {
        Self::new(credentials, random_state())
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope = join_scopes(scopes);
        self
    }

    pub fn with_port(self, port: u16) -> Self {
        self.with_callback_server(CallbackServer::new(port, CallbackMode::Fragment))
    }

    /// Uses `server` for the redirect. It should run in [`CallbackMode::Fragment`], since the
    /// token arrives in the URL fragment.
    pub fn with_callback_server(mut self, server: CallbackServer) -> Self {
        if server.mode() != CallbackMode::Fragment {
            tracing::warn!("implicit grant callback server does not read the URL fragment");
        }
        self.redirect_uri = server.redirect_uri();
        self.receiver = Box::new(server);
        self
    }

    pub fn with_receiver(
        mut self,
        redirect_uri: impl Into<String>,
        receiver: impl GrantReceiver + 'static,
    ) -> Self {
        self.redirect_uri = redirect_uri.into();
        self.receiver = Box::new(receiver);
        self
    }

    pub fn with_endpoints(mut self, endpoints: &Endpoints) -> Self {
        self.authorize_url = endpoints.authorize.clone();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn authorization_url(&self) -> Url {
        authorization_url(
            &self.authorize_url,
            GrantType::Implicit,
            &self.credentials,
            &self.redirect_uri,
            &self.state,
            &self.scope,
        )
    }

    fn start(&self) -> Step {
        Step::Authorize(self.authorization_url())
    }

    fn advance(&self, event: Event) -> Result<Step> {
        match event {
            Event::Granted(result) => {
                let token = match verify_grant(
                    &self.state,
                    result.received_state.as_deref(),
                    result.access_token,
                ) {
                    Ok(token) => Some(AccessToken::new(token)),
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding implicit grant");
                        None
                    }
                };
                Ok(Step::Done(token))
            }
            Event::Responded(_) | Event::Polled(_) => Err(Error::Protocol(
                "implicit flow takes its token from the redirect",
            )),
        }
    }
}

/// User token via a code the user enters on another device.
#[derive(Clone)]
pub struct DeviceCodeFlow {
    credentials: ClientCredentials,
    scope: String,
    device_url: Url,
    instructions: Instructions,
    fallback_interval: Duration,
    access_token: Option<AccessToken>,
    phase: Phase,
}

impl fmt::Debug for DeviceCodeFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeFlow")
            .field("credentials", &self.credentials)
            .field("scope", &self.scope)
            .field("device_url", &self.device_url)
            .field("fallback_interval", &self.fallback_interval)
            .field("access_token", &self.access_token)
            .finish_non_exhaustive()
    }
}

/// Tells the user on stdout where to enter the code.
pub fn print_instructions(grant: &DeviceCodeGrantResponse) {
    println!("> open the following link {}", grant.activate_link);
    println!("> and insert this code: {}", grant.user_code);
}

impl DeviceCodeFlow {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials,
            scope: DEFAULT_SCOPE.to_string(),
            device_url: Endpoints::default().device,
            instructions: Arc::new(print_instructions),
            fallback_interval: DEFAULT_POLL_INTERVAL,
            access_token: None,
            phase: Phase::Idle,
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope = join_scopes(scopes);
        self
    }

    /// Shows the activation link and user code some other way than [`print_instructions`].
    pub fn with_instructions<F>(mut self, instructions: F) -> Self
    where
        F: Fn(&DeviceCodeGrantResponse) + Send + Sync + 'static,
    {
        self.instructions = Arc::new(instructions);
        self
    }

    pub fn with_endpoints(mut self, endpoints: &Endpoints) -> Self {
        self.device_url = endpoints.device.clone();
        self
    }

    /// Polls this often when the device endpoint answers with no interval (or zero), instead of
    /// every [`DEFAULT_POLL_INTERVAL`].
    pub fn with_fallback_interval(mut self, interval: Duration) -> Self {
        self.fallback_interval = interval;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<AccessToken>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn start(&self) -> Step {
        Step::Send(
            TokenRequest::new(self.device_url.clone(), &self.credentials)
                .field("grant_type", GrantType::DeviceGrant.as_str())
                .field("scope", self.scope.clone()),
        )
    }

    fn advance(&self, event: Event) -> Result<Step> {
        match event {
            Event::Responded(response) => {
                if !response.is_success() {
                    tracing::warn!(status = %response.status, "device code request rejected");
                    return Ok(Step::Done(None));
                }
                let grant: DeviceCodeGrantResponse = match response.json() {
                    Ok(grant) => grant,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed device code response");
                        return Ok(Step::Done(None));
                    }
                };
                tracing::info!(
                    activate_link = %grant.activate_link,
                    expires_in = grant.expires_in,
                    "waiting for the user to activate the device"
                );
                (self.instructions)(&grant);

                // relative links resolve against the device endpoint
                let authorize_url = self.device_url.join(&grant.authorize_link)?;
                Ok(Step::Poll(PollRequest {
                    request: TokenRequest::new(authorize_url, &self.credentials)
                        .field("user_code", grant.user_code)
                        .field("device_code", grant.device_code),
                    expires_in: Duration::from_secs(grant.expires_in),
                    interval: match grant.interval {
                        0 => self.fallback_interval,
                        secs => Duration::from_secs(secs),
                    },
                }))
            }
            Event::Polled(response) => Ok(Step::Done(response.access_token())),
            Event::Granted(_) => Err(Error::Protocol(
                "device flow does not use a browser redirect",
            )),
        }
    }
}

/// One of the four grant flows, as used by the client's authentication hook.
///
/// A flow holds on to the first token it acquires and returns it for every later request.
#[derive(Debug)]
pub enum Flow {
    ClientCredentials(ClientCredentialsFlow),
    AuthorizationCode(AuthorizationCodeFlow),
    Implicit(ImplicitGrantFlow),
    DeviceCode(DeviceCodeFlow),
}

impl From<ClientCredentialsFlow> for Flow {
    fn from(flow: ClientCredentialsFlow) -> Self {
        Flow::ClientCredentials(flow)
    }
}

impl From<AuthorizationCodeFlow> for Flow {
    fn from(flow: AuthorizationCodeFlow) -> Self {
        Flow::AuthorizationCode(flow)
    }
}

impl From<ImplicitGrantFlow> for Flow {
    fn from(flow: ImplicitGrantFlow) -> Self {
        Flow::Implicit(flow)
    }
}

impl From<DeviceCodeFlow> for Flow {
    fn from(flow: DeviceCodeFlow) -> Self {
        Flow::DeviceCode(flow)
    }
}

impl Flow {
    pub fn grant_type(&self) -> GrantType {
        match self {
            Flow::ClientCredentials(_) => GrantType::ClientCredentials,
            Flow::AuthorizationCode(_) => GrantType::AuthorizationCode,
            Flow::Implicit(_) => GrantType::Implicit,
            Flow::DeviceCode(_) => GrantType::DeviceGrant,
        }
    }

    /// The cached token, if one has been acquired or supplied.
    pub fn access_token(&self) -> Option<&AccessToken> {
        match self {
            Flow::ClientCredentials(flow) => flow.access_token.as_ref(),
            Flow::AuthorizationCode(flow) => flow.access_token.as_ref(),
            Flow::Implicit(flow) => flow.access_token.as_ref(),
            Flow::DeviceCode(flow) => flow.access_token.as_ref(),
        }
    }

    fn cache(&mut self, token: AccessToken) {
        let slot = match self {
            Flow::ClientCredentials(flow) => &mut flow.access_token,
            Flow::AuthorizationCode(flow) => &mut flow.access_token,
            Flow::Implicit(flow) => &mut flow.access_token,
            Flow::DeviceCode(flow) => &mut flow.access_token,
        };
        *slot = Some(token);
    }

    fn phase_mut(&mut self) -> &mut Phase {
        match self {
            Flow::ClientCredentials(flow) => &mut flow.phase,
            Flow::AuthorizationCode(flow) => &mut flow.phase,
            Flow::Implicit(flow) => &mut flow.phase,
            Flow::DeviceCode(flow) => &mut flow.phase,
        }
    }

    fn receiver(&mut self) -> Result<&mut dyn GrantReceiver> {
        match self {
            Flow::AuthorizationCode(flow) => Ok(flow.receiver.as_mut()),
            Flow::Implicit(flow) => Ok(flow.receiver.as_mut()),
            Flow::ClientCredentials(_) | Flow::DeviceCode(_) => {
                Err(Error::Protocol("flow has no browser redirect"))
            }
        }
    }

    /// The first step of an acquisition.
    ///
    /// Starting again abandons any acquisition still in progress.
    pub fn start(&mut self) -> Step {
        let step = match self {
            Flow::ClientCredentials(flow) => flow.start(),
            Flow::AuthorizationCode(flow) => flow.start(),
            Flow::Implicit(flow) => flow.start(),
            Flow::DeviceCode(flow) => flow.start(),
        };
        *self.phase_mut() = Phase::after(&step);
        step
    }

    /// Resumes an acquisition with the outcome of the step it last handed out.
    ///
    /// Each step is answered exactly once, by its own event. Any other event (one the flow never
    /// asks for, one that arrives before its step, or anything after [`Step::Done`]) fails with
    /// [`Error::Protocol`] and abandons the acquisition.
    pub fn advance(&mut self, event: Event) -> Result<Step> {
        let phase = std::mem::take(self.phase_mut());
        if !phase.accepts(&event) {
            return Err(Error::Protocol(match phase {
                Phase::Idle => "flow resumed with no step pending",
                _ => "event does not answer the pending step",
            }));
        }
        let step = match self {
            Flow::ClientCredentials(flow) => flow.advance(event),
            Flow::AuthorizationCode(flow) => flow.advance(event),
            Flow::Implicit(flow) => flow.advance(event),
            Flow::DeviceCode(flow) => flow.advance(event),
        }?;
        *self.phase_mut() = Phase::after(&step);
        Ok(step)
    }

    /// Returns the cached token, or acquires one.
    ///
    /// `Ok(None)` means this attempt produced no token (rejected request, missing or mismatched
    /// grant); nothing is cached and the next call tries again.
    #[tracing::instrument(skip_all, fields(grant = %self.grant_type()))]
    pub async fn get_token(&mut self, http: &reqwest::Client) -> Result<Option<AccessToken>> {
        if let Some(token) = self.access_token() {
            return Ok(Some(token.clone()));
        }

        let mut step = self.start();
        let token = loop {
            let event = match step {
                Step::Done(token) => break token,
                Step::Authorize(url) => Event::Granted(self.receiver()?.receive(&url).await?),
                Step::Send(request) => {
                    let response = request.to_async(http).send().await?;
                    Event::Responded(TokenResponse::read(response).await?)
                }
                Step::Poll(request) => {
                    Event::Polled(poll::poll_authorize_url(http, &request).await?)
                }
            };
            step = self.advance(event)?;
        };

        if let Some(token) = &token {
            tracing::info!("acquired access token");
            self.cache(token.clone());
        }
        Ok(token)
    }

    /// Blocking counterpart of [`Self::get_token`].
    #[tracing::instrument(skip_all, fields(grant = %self.grant_type()))]
    pub fn get_token_blocking(
        &mut self,
        http: &reqwest::blocking::Client,
    ) -> Result<Option<AccessToken>> {
        if let Some(token) = self.access_token() {
            return Ok(Some(token.clone()));
        }

        let mut step = self.start();
        let token = loop {
            let event = match step {
                Step::Done(token) => break token,
                Step::Authorize(url) => Event::Granted(self.receiver()?.receive_blocking(&url)?),
                Step::Send(request) => {
                    let response = request.to_blocking(http).send()?;
                    Event::Responded(TokenResponse::read_blocking(response)?)
                }
                Step::Poll(request) => {
                    Event::Polled(poll::poll_authorize_url_blocking(http, &request)?)
                }
            };
            step = self.advance(event)?;
        };

        if let Some(token) = &token {
            tracing::info!("acquired access token");
            self.cache(token.clone());
        }
        Ok(token)
    }

    /// The authentication hook: sets `Authorization: Bearer <token>` on `headers` if a token can
    /// be had.
    ///
    /// When acquisition fails the headers are left untouched and the request goes out
    /// unauthenticated, leaving the API's 401 as the visible signal. Only
    /// [fatal](Error::is_fatal) errors are returned.
    pub async fn authenticate(
        &mut self,
        http: &reqwest::Client,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        let outcome = self.get_token(http).await;
        self.apply(outcome, headers)
    }

    /// Blocking counterpart of [`Self::authenticate`].
    pub fn authenticate_blocking(
        &mut self,
        http: &reqwest::blocking::Client,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        let outcome = self.get_token_blocking(http);
        self.apply(outcome, headers)
    }

    fn apply(&self, outcome: Result<Option<AccessToken>>, headers: &mut HeaderMap) -> Result<()> {
        match outcome {
            Ok(Some(token)) => match token.bearer_header() {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "access token is not a valid header value");
                }
            },
            Ok(None) => {
                tracing::warn!(
                    grant = %self.grant_type(),
                    "no access token acquired, sending request unauthenticated"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    grant = %self.grant_type(),
                    error = %e,
                    "access token acquisition failed, sending request unauthenticated"
                );
            }
        }
        Ok(())
    }
}
