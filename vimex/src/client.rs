//! HTTP clients that authenticate their requests through an OAuth [`Flow`].

use crate::config::{API_ACCEPT, Endpoints};
use crate::error::Result;
use crate::oauth::{AccessToken, Flow};
use http::Method;
use http::header::ACCEPT;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::instrument;

fn http_client() -> reqwest::ClientBuilder {
    // SSRF no thank you.
    reqwest::ClientBuilder::new().redirect(reqwest::redirect::Policy::none())
}

/// Async client for the Vimeo API.
///
/// Before each request sent through [`Self::execute`], the client asks its flow (if any) for a
/// token. The flow sits behind a mutex, so concurrent requests wait for a single acquisition
/// rather than each starting their own. Cloning the client shares both the connection pool and
/// the flow.
#[derive(Debug, Clone)]
pub struct VimeoClient {
    pub(crate) http: reqwest::Client,
    auth: Option<Arc<Mutex<Flow>>>,
    pub(crate) endpoints: Arc<Endpoints>,
}

impl VimeoClient {
    /// An unauthenticated client for the production API.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized, as [`reqwest::Client::new`] does.
    pub fn new() -> Self {
        Self::with_http_client(
            http_client()
                .build()
                .expect("building reqwest client should not fail"),
        )
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            http,
            auth: None,
            endpoints: Arc::new(Endpoints::default()),
        }
    }

    /// Authenticates every request with `flow`.
    pub fn with_auth(mut self, flow: impl Into<Flow>) -> Self {
        self.auth = Some(Arc::new(Mutex::new(flow.into())));
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Starts a request that accepts the pinned API version.
    pub fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
        self.http.request(method, url).header(ACCEPT, API_ACCEPT)
    }

    /// The token the flow has cached so far, without acquiring one.
    pub async fn access_token(&self) -> Option<AccessToken> {
        let flow = self.auth.as_ref()?;
        flow.lock().await.access_token().cloned()
    }

    /// Returns the cached token, or runs the flow to acquire one.
    ///
    /// Unlike the authentication hook, acquisition errors are returned as they are.
    pub async fn acquire_token(&self) -> Result<Option<AccessToken>> {
        match &self.auth {
            Some(flow) => flow.lock().await.get_token(&self.http).await,
            None => Ok(None),
        }
    }

    /// Runs the authentication hook on `request`.
    ///
    /// Sets the bearer token if one can be had; otherwise leaves the request as it is.
    pub async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        if let Some(flow) = &self.auth {
            flow.lock()
                .await
                .authenticate(&self.http, request.headers_mut())
                .await?;
        }
        Ok(())
    }

    /// Authenticates and sends `request`.
    ///
    /// Transport errors of the request itself are returned unchanged; an HTTP error status is
    /// not an error here.
    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        self.authenticate(&mut request).await?;
        let response = self.http.execute(request).await?;
        tracing::debug!(status = %response.status(), "Vimeo API responded");
        Ok(response)
    }
}

impl Default for VimeoClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking client for the Vimeo API.
///
/// Behaves like [`VimeoClient`], running flows and uploads on the calling thread. Like
/// [`reqwest::blocking::Client`], it must not be used from within an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingVimeoClient {
    pub(crate) http: reqwest::blocking::Client,
    auth: Option<Arc<std::sync::Mutex<Flow>>>,
    pub(crate) endpoints: Arc<Endpoints>,
}

impl BlockingVimeoClient {
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized or if called from within an async
    /// runtime, as [`reqwest::blocking::Client::new`] does.
    pub fn new() -> Self {
        Self::with_http_client(
            reqwest::blocking::ClientBuilder::new()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("building reqwest client should not fail"),
        )
    }

    pub fn with_http_client(http: reqwest::blocking::Client) -> Self {
        Self {
            http,
            auth: None,
            endpoints: Arc::new(Endpoints::default()),
        }
    }

    pub fn with_auth(mut self, flow: impl Into<Flow>) -> Self {
        self.auth = Some(Arc::new(std::sync::Mutex::new(flow.into())));
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn http_client(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    pub fn request(
        &self,
        method: Method,
        url: impl reqwest::IntoUrl,
    ) -> reqwest::blocking::RequestBuilder {
        self.http.request(method, url).header(ACCEPT, API_ACCEPT)
    }

    fn flow(&self) -> Option<std::sync::MutexGuard<'_, Flow>> {
        // a panic mid-acquisition leaves at worst no cached token, so the flow stays usable
        self.auth
            .as_ref()
            .map(|flow| flow.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.flow()?.access_token().cloned()
    }

    pub fn acquire_token(&self) -> Result<Option<AccessToken>> {
        match self.flow() {
            Some(mut flow) => flow.get_token_blocking(&self.http),
            None => Ok(None),
        }
    }

    pub fn authenticate(&self, request: &mut reqwest::blocking::Request) -> Result<()> {
        if let Some(mut flow) = self.flow() {
            flow.authenticate_blocking(&self.http, request.headers_mut())?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub fn execute(
        &self,
        mut request: reqwest::blocking::Request,
    ) -> Result<reqwest::blocking::Response> {
        self.authenticate(&mut request)?;
        let response = self.http.execute(request)?;
        tracing::debug!(status = %response.status(), "Vimeo API responded");
        Ok(response)
    }
}

impl Default for BlockingVimeoClient {
    fn default() -> Self {
        Self::new()
    }
}
