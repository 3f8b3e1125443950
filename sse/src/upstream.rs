//! The single long-lived connection to the backend's global event feed.

use crate::error::Result;
use crate::frame::{Frame, FrameReader};
use crate::manager::Shared;
use crate::matcher::SessionMatcher;
use crate::payload::{extract_payloads, Payload};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use log::*;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use secrecy::{ExposeSecret, SecretString};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Frame source over a streaming upstream response body.
pub type FeedReader = FrameReader<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>>;

/// Connectivity of the shared feed, observed by subscribers waiting for it to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Connected,
    Unavailable,
}

/// Published feed state. `connects` counts successful connects of this
/// generation, so a short-lived connection is still observable after the
/// status has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedState {
    pub status: FeedStatus,
    pub connects: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            status: FeedStatus::Connecting,
            connects: 0,
        }
    }
}

/// HTTP access to the backend's global event endpoint.
pub struct UpstreamClient {
    client: reqwest::Client,
    events_url: String,
    token: SecretString,
}

impl UpstreamClient {
    /// `client` must not carry a total request timeout: the event response never completes.
    pub fn new(client: reqwest::Client, events_url: String, token: SecretString) -> Self {
        Self {
            client,
            events_url,
            token,
        }
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    /// Opens the event stream. Only the response head is awaited here.
    pub async fn connect(&self) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(&self.events_url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let token = self.token.expose_secret();
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response)
    }

    /// Wraps a connected response body in an incremental frame reader.
    pub fn frames(response: reqwest::Response) -> FeedReader {
        let body = response.bytes_stream().map_err(io::Error::other).boxed();
        FrameReader::new(StreamReader::new(body))
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    /// `max_attempts` consecutive connect failures end the feed; 0 retries forever.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(failures.min(31) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Task body that owns one generation of the shared feed.
///
/// Reads frames, decodes payloads and dispatches them to the registry until
/// cancelled. End of stream or a read error triggers a reconnect; running out
/// of connect attempts ends every open session stream.
pub(crate) struct UpstreamReader {
    pub(crate) shared: Arc<Shared>,
    pub(crate) client: Arc<UpstreamClient>,
    pub(crate) matcher: SessionMatcher,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) status: watch::Sender<FeedState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) generation: u64,
}

impl UpstreamReader {
    pub(crate) async fn run(self) {
        let mut failures = 0u32;

        loop {
            self.status.send_modify(|state| state.status = FeedStatus::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                connected = self.client.connect() => connected,
            };

            match connected {
                Ok(response) => {
                    failures = 0;
                    info!(
                        "Upstream event feed {} connected (generation {})",
                        self.client.events_url(),
                        self.generation
                    );
                    self.status.send_modify(|state| {
                        state.status = FeedStatus::Connected;
                        state.connects += 1;
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.pump(response) => {}
                    }
                    self.status.send_modify(|state| state.status = FeedStatus::Connecting);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Upstream event feed unavailable (attempt {failures}): {e}");
                    self.status.send_modify(|state| state.status = FeedStatus::Unavailable);

                    if self.policy.is_exhausted(failures) {
                        error!("Giving up on upstream event feed after {failures} failed attempts");
                        self.shared.retire_feed(self.generation);
                        return;
                    }
                }
            }

            let delay = self.policy.delay(failures);
            debug!("Reconnecting to upstream event feed in {delay:?}");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Upstream event feed generation {} stopped", self.generation);
    }

    async fn pump(&self, response: reqwest::Response) {
        let mut frames = UpstreamClient::frames(response);

        loop {
            match frames.next_frame().await {
                Ok(Some(frame)) => self.publish(&frame),
                Ok(None) => {
                    info!("Upstream event feed ended");
                    return;
                }
                Err(e) => {
                    warn!("Upstream event feed read failed: {e}");
                    return;
                }
            }
        }
    }

    fn publish(&self, frame: &Frame) {
        for payload in extract_payloads(frame) {
            let payload: Arc<Payload> = Arc::new(payload);
            let outcome = self.shared.registry.dispatch(&payload, &self.matcher);
            trace!(
                "Dispatched upstream payload to {} connection(s), evicted {}",
                outcome.delivered,
                outcome.evicted
            );
        }
    }
}
