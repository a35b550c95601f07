//! Device-code polling (RFC 8628 §3.4).
//!
//! After the user has been shown the activation link and code, the client repeatedly POSTs the
//! device and user codes to the authorization link until Vimeo answers with a token or the codes
//! expire.
//!
//! Error responses are read for their `error` field: `authorization_pending` keeps polling,
//! `slow_down` lengthens the interval by five seconds, and `access_denied` or `expired_token` end
//! the poll at once. Any other non-success response counts as still pending.

use super::{TokenRequest, TokenResponse};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Added to the polling interval each time the server answers `slow_down`.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// A polling request and its time bounds.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub request: TokenRequest,
    /// Polling fails once this much time has passed since the first attempt.
    pub expires_in: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

/// Polls until a 2xx response, returning it.
///
/// Fails with [`Error::PollingTimeout`] once `expires_in` has elapsed and with
/// [`Error::DeviceAuthorization`] if the server reports a terminal error. Transport errors are
/// returned as they occur.
#[instrument(skip_all, fields(url = %request.request.url))]
pub async fn poll_authorize_url(
    http: &reqwest::Client,
    request: &PollRequest,
) -> Result<TokenResponse> {
    let mut poll = Polling::start(request);
    while poll.should_continue() {
        let response = request.request.to_async(http).send().await?;
        let response = TokenResponse::read(response).await?;
        if let Some(interval) = poll.on_response(response)? {
            tokio::time::sleep(interval).await;
        } else {
            return poll.finish();
        }
    }
    poll.finish()
}

/// Blocking counterpart of [`poll_authorize_url`], sleeping on the calling thread.
#[instrument(skip_all, fields(url = %request.request.url))]
pub fn poll_authorize_url_blocking(
    http: &reqwest::blocking::Client,
    request: &PollRequest,
) -> Result<TokenResponse> {
    let mut poll = Polling::start(request);
    while poll.should_continue() {
        let response = request.request.to_blocking(http).send()?;
        let response = TokenResponse::read_blocking(response)?;
        if let Some(interval) = poll.on_response(response)? {
            std::thread::sleep(interval);
        } else {
            return poll.finish();
        }
    }
    poll.finish()
}

/// Polling decisions shared by the async and blocking drivers.
struct Polling<'a> {
    request: &'a PollRequest,
    started: Instant,
    interval: Duration,
    attempts: u32,
    success: Option<TokenResponse>,
}

impl<'a> Polling<'a> {
    fn start(request: &'a PollRequest) -> Self {
        Self {
            request,
            started: Instant::now(),
            interval: request.interval,
            attempts: 0,
            success: None,
        }
    }

    fn should_continue(&self) -> bool {
        self.started.elapsed() < self.request.expires_in
    }

    /// Returns how long to wait before the next attempt, or `None` once polling succeeded.
    fn on_response(&mut self, response: TokenResponse) -> Result<Option<Duration>> {
        self.attempts += 1;
        if response.is_success() {
            tracing::debug!(attempts = self.attempts, "device authorized");
            self.success = Some(response);
            return Ok(None);
        }

        match pending_error(&response).as_deref() {
            Some("slow_down") => {
                self.interval += SLOW_DOWN_INCREMENT;
                tracing::debug!(interval = ?self.interval, "server asked to slow down");
            }
            Some(error @ ("access_denied" | "expired_token")) => {
                return Err(Error::DeviceAuthorization {
                    error: error.to_string(),
                });
            }
            error => {
                tracing::trace!(
                    attempts = self.attempts,
                    status = %response.status,
                    error,
                    "device authorization still pending"
                );
            }
        }
        Ok(Some(self.interval))
    }

    fn finish(self) -> Result<TokenResponse> {
        match self.success {
            Some(response) => Ok(response),
            None => {
                tracing::warn!(attempts = self.attempts, "device authorization timed out");
                Err(Error::PollingTimeout {
                    url: self.request.request.url.to_string(),
                    expires_in: self.request.expires_in,
                })
            }
        }
    }
}

fn pending_error(response: &TokenResponse) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }

    response.json::<ErrorBody>().ok().and_then(|body| body.error)
}
