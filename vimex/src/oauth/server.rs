//! Loopback HTTP server that receives the OAuth authorization redirect.
//!
//! The server binds `127.0.0.1:<port>`, opens the user's browser at the authorization URL, and
//! waits for the authorization server to redirect the browser back to it. The first callback that
//! carries a grant completes the wait; the listener is released as soon as the wait ends, whether
//! it ends with a grant, an error, or the future being dropped.
//!
//! # The implicit-grant fragment
//!
//! In the implicit grant the token is delivered in the URL *fragment*
//! (`http://127.0.0.1:5555/#access_token=...`), which browsers never send to servers. In
//! [`CallbackMode::Fragment`] the server therefore answers a bare callback with a tiny page whose
//! script moves the fragment into the query string and loads the page again. The second request
//! carries the token where the server can see it. This is a protocol quirk of the implicit grant,
//! not something the server side can avoid.

use crate::error::{Error, Result};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::{Stream, StreamExt};
use url::Url;

/// Port of the redirect URI registered for the application.
pub const DEFAULT_PORT: u16 = 5555;

/// Page shown once the grant has been received.
pub const DEFAULT_DONE_HTML: &str = "<html><body>\
<p>Authorization complete. You can close this window and return to the application.</p>\
</body></html>";

const FRAGMENT_REDIRECT_HTML: &str = r#"<html><body><script>
var fragment = window.location.hash.substring(1);
window.location.replace(window.location.pathname + "?" + (fragment || "error=missing_fragment"));
</script></body></html>"#;

/// How long in-flight callback responses get to finish once the grant has arrived.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed accept, so a persistent failure such as `EMFILE` does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The grant carried by the authorization redirect.
///
/// Fields the redirect did not carry are `None`. Whether a missing field means the user denied
/// access is for the flow to decide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowResult {
    pub code: Option<String>,
    pub received_state: Option<String>,
    pub access_token: Option<String>,
}

impl FlowResult {
    /// Reads `code`, `state` and `access_token` from a URL query string.
    pub fn from_query(query: &str) -> Self {
        let mut result = Self::default();
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            match &*k {
                "code" => result.code = Some(v.into_owned()),
                "state" => result.received_state = Some(v.into_owned()),
                "access_token" => result.access_token = Some(v.into_owned()),
                _ => {}
            }
        }
        result
    }

    /// Whether a query string is the authorization server's answer rather than a bare callback.
    fn is_answer(query: &str) -> bool {
        form_urlencoded::parse(query.as_bytes()).any(|(k, _)| {
            matches!(&*k, "code" | "state" | "access_token" | "error")
        })
    }
}

/// Where the authorization server puts the grant in the redirect URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    /// In the query string (authorization-code grant).
    Query,
    /// In the fragment (implicit grant).
    Fragment,
}

pub type GrantFuture<'a> = Pin<Box<dyn Future<Output = Result<FlowResult>> + Send + 'a>>;

/// Obtains an authorization grant by sending the user to an authorization URL.
///
/// [`CallbackServer`] is the real implementation. Flows hold a boxed receiver so tests can
/// substitute one that answers without a browser or a listening socket.
pub trait GrantReceiver: fmt::Debug + Send {
    /// Sends the user to `authorization_url` and suspends until the redirect arrives.
    fn receive<'a>(&'a mut self, authorization_url: &'a Url) -> GrantFuture<'a>;

    /// Sends the user to `authorization_url` and blocks until the redirect arrives.
    fn receive_blocking(&mut self, authorization_url: &Url) -> Result<FlowResult>;
}

/// A single-use loopback server for one authorization attempt at a time.
#[derive(Debug, Clone)]
pub struct CallbackServer {
    addr: SocketAddr,
    mode: CallbackMode,
    done_html: &'static str,
    timeout: Option<Duration>,
}

impl CallbackServer {
    pub fn new(port: u16, mode: CallbackMode) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            mode,
            done_html: DEFAULT_DONE_HTML,
            timeout: None,
        }
    }

    /// Replaces the page shown to the user after the grant has been received.
    pub fn with_done_html(mut self, html: &'static str) -> Self {
        self.done_html = html;
        self
    }

    /// Gives up waiting for the redirect after `timeout`.
    ///
    /// By default the server waits until a callback arrives or the process ends.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn mode(&self) -> CallbackMode {
        self.mode
    }

    /// The redirect URI that leads the browser back to this server.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Binds the loopback port without waiting for anything yet.
    ///
    /// Fails with [`Error::Bind`] if the port is taken; there is no retry and no fallback port,
    /// since the redirect URI registered with Vimeo names this exact port.
    pub async fn bind(&self) -> Result<BoundCallbackServer> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.addr,
                source,
            })?;
        tracing::debug!(addr = %self.addr, mode = ?self.mode, "OAuth callback server listening");
        Ok(BoundCallbackServer {
            listener,
            mode: self.mode,
            done_html: self.done_html,
            timeout: self.timeout,
        })
    }

    /// Opens the browser at `authorization_url` and suspends until the redirect arrives.
    #[tracing::instrument(skip_all, fields(addr = %self.addr))]
    pub async fn get_authorization_grant(&self, authorization_url: &Url) -> Result<FlowResult> {
        let server = self.bind().await?;
        let url = authorization_url.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || open_browser(&url)).await {
            tracing::warn!(error = %e, "browser launcher task failed");
        }
        server.wait().await
    }

    /// Opens the browser at `authorization_url` and blocks until the redirect arrives.
    ///
    /// Runs the same server as [`Self::get_authorization_grant`] on a private single-threaded
    /// runtime. Must not be called from within an async runtime.
    pub fn get_authorization_grant_blocking(&self, authorization_url: &Url) -> Result<FlowResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.get_authorization_grant(authorization_url))
    }
}

impl GrantReceiver for CallbackServer {
    fn receive<'a>(&'a mut self, authorization_url: &'a Url) -> GrantFuture<'a> {
        Box::pin(self.get_authorization_grant(authorization_url))
    }

    fn receive_blocking(&mut self, authorization_url: &Url) -> Result<FlowResult> {
        self.get_authorization_grant_blocking(authorization_url)
    }
}

fn open_browser(url: &Url) {
    tracing::info!(url = %url, "asking user to follow OAuth flow");
    if let Err(e) = webbrowser::open(url.as_str()) {
        tracing::warn!(
            error = %e,
            url = %url,
            "could not open a browser, open the authorization URL manually"
        );
    }
}

/// A callback server holding its port, ready to wait for the redirect.
#[derive(Debug)]
pub struct BoundCallbackServer {
    listener: TcpListener,
    mode: CallbackMode,
    done_html: &'static str,
    timeout: Option<Duration>,
}

impl BoundCallbackServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves callbacks until one carries the authorization server's answer.
    ///
    /// Consumes the server, so the port is released once this returns or is dropped.
    pub async fn wait(self) -> Result<FlowResult> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.serve())
                .await
                .map_err(|_| Error::GrantTimeout(timeout))?,
            None => self.serve().await,
        }
    }

    async fn serve(self) -> Result<FlowResult> {
        serve_connections(
            TcpListenerStream::new(self.listener),
            self.mode,
            self.done_html,
        )
        .await
    }
}

/// Serves callbacks arriving on `incoming` until one carries the authorization server's answer.
///
/// A failed accept (e.g. `ECONNABORTED`, `EMFILE`) is logged and waited out; only the answer
/// ends the wait.
async fn serve_connections<S>(
    mut incoming: S,
    mode: CallbackMode,
    done_html: &'static str,
) -> Result<FlowResult>
where
    S: Stream<Item = io::Result<TcpStream>> + Unpin,
{
    let (got, mut gotten) = mpsc::channel(1);
    let mut connections = JoinSet::new();

    let result = loop {
        tokio::select! {
            Some(accepted) = incoming.next() => {
                let conn = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept OAuth callback connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                tracing::trace!(peer = ?conn.peer_addr().ok(), "accepted OAuth callback connection");
                let got = got.clone();
                connections.spawn(async move {
                    let conn = hyper_util::rt::TokioIo::new(conn);
                    let service = service_fn(move |req| {
                        let got = got.clone();
                        async move { Ok::<_, Infallible>(callback(req, mode, done_html, &got)) }
                    });
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .keep_alive(false)
                        .serve_connection(conn, service)
                        .await
                    {
                        tracing::debug!(error = %e, "OAuth callback connection failed");
                    }
                });
            }
            Some(result) = gotten.recv() => break result,
        }
    };
    drop(incoming);

    // let the browser receive the completion page before the connections are torn down
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::debug!("aborting lingering OAuth callback connections");
    }

    tracing::debug!(
        has_code = result.code.is_some(),
        has_token = result.access_token.is_some(),
        "received OAuth callback"
    );
    Ok(result)
}

fn callback(
    req: Request<Incoming>,
    mode: CallbackMode,
    done_html: &'static str,
    got: &mpsc::Sender<FlowResult>,
) -> Response<Full<Bytes>> {
    if req.uri().path() != "/" {
        let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    let query = req.uri().query().unwrap_or("");
    if mode == CallbackMode::Fragment && !FlowResult::is_answer(query) {
        tracing::debug!("moving implicit grant from the URL fragment into the query string");
        return html(FRAGMENT_REDIRECT_HTML);
    }

    // only the first answer counts; later ones find the channel full
    if got.try_send(FlowResult::from_query(query)).is_err() {
        tracing::debug!("ignoring repeated OAuth callback");
    }
    html(done_html)
}

fn html(body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
