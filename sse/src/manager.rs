use crate::connection::{ConnectionId, ConnectionRegistry, SessionId};
use crate::error::{Error, Result, SessionErrorKind, UpstreamErrorKind};
use crate::matcher::SessionMatcher;
use crate::payload::Payload;
use crate::upstream::{FeedState, FeedStatus, ReconnectPolicy, UpstreamClient, UpstreamReader};
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Tunables for session streams and the shared upstream feed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub matcher: SessionMatcher,
    pub heartbeat_interval: Duration,
    pub buffer_capacity: usize,
    /// Longest a new subscriber waits for the feed to come up before failing.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            matcher: SessionMatcher::default(),
            heartbeat_interval: Duration::from_secs(25),
            buffer_capacity: 64,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// The running generation of the shared upstream feed.
struct Feed {
    generation: u64,
    cancel: CancellationToken,
    status: watch::Receiver<FeedState>,
}

#[derive(Default)]
struct FeedSlot {
    current: Option<Feed>,
    generation: u64,
}

/// State shared between the manager, its subscriptions and the feed task.
///
/// Registration changes that can start or stop the feed all go through the
/// slot lock, so "last subscriber left" and "first subscriber arrived" can
/// never interleave. Payload dispatch only touches the registry.
pub(crate) struct Shared {
    pub(crate) registry: ConnectionRegistry,
    slot: Mutex<FeedSlot>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            slot: Mutex::new(FeedSlot::default()),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, FeedSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deregister a connection, stopping the feed if nobody is left listening.
    fn release(&self, connection_id: &ConnectionId) {
        let mut slot = self.lock_slot();
        self.registry.unregister(connection_id);

        if self.registry.is_empty() {
            if let Some(feed) = slot.current.take() {
                info!(
                    "Last session stream closed; stopping upstream feed generation {}",
                    feed.generation
                );
                feed.cancel.cancel();
            }
        }
    }

    /// Called by a feed task that has given up reconnecting: ends every open stream.
    pub(crate) fn retire_feed(&self, generation: u64) {
        let mut slot = self.lock_slot();
        let is_current = slot
            .current
            .as_ref()
            .is_some_and(|feed| feed.generation == generation);
        if !is_current {
            return;
        }

        if let Some(feed) = slot.current.take() {
            feed.cancel.cancel();
        }
        let closed = self.registry.close_all();
        warn!("Upstream event feed is gone; ended {closed} session stream(s)");
    }

    fn register(
        self: &Arc<Self>,
        session_id: &str,
        settings: &Settings,
    ) -> (Subscription, MutexGuard<'_, FeedSlot>) {
        let slot = self.lock_slot();
        let (sender, receiver) = mpsc::channel(settings.buffer_capacity.max(1));
        let connection_id = self.registry.register(session_id.to_owned(), sender);

        let subscription = Subscription {
            connection_id,
            session_id: session_id.to_owned(),
            receiver,
            heartbeat_interval: settings.heartbeat_interval,
            shared: Arc::clone(self),
        };
        (subscription, slot)
    }
}

/// Owns session registrations and the lazily started shared upstream feed.
pub struct Manager {
    shared: Arc<Shared>,
    upstream: Arc<UpstreamClient>,
    settings: Settings,
}

impl Manager {
    pub fn new(upstream: UpstreamClient, settings: Settings) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            upstream: Arc::new(upstream),
            settings,
        }
    }

    /// Register a session stream and make sure the upstream feed is connected.
    ///
    /// The registration exists before the feed can read anything, so the
    /// subscriber never misses an event published after this call starts
    /// waiting. The subscription is accepted once the feed is connected, or
    /// has connected at least once since registration even if that
    /// connection already dropped again. Fails with an upstream error if the
    /// feed can't be brought up; the registration is released in that case.
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        if session_id.is_empty() {
            return Err(Error::session(
                SessionErrorKind::EmptyId,
                "session identifier must not be empty",
            ));
        }

        let (subscription, mut status, seen_connects) = {
            let (subscription, mut slot) = self.shared.register(session_id, &self.settings);
            let status = self.ensure_feed(&mut slot);
            let seen_connects = status.borrow().connects;
            (subscription, status, seen_connects)
        };
        info!(
            "Registered session stream {} for session {}",
            subscription.connection_id.as_str(),
            session_id
        );

        let is_live = |state: &FeedState| {
            state.status == FeedStatus::Connected || state.connects > seen_connects
        };
        let ready = tokio::time::timeout(self.settings.connect_timeout, async {
            status
                .wait_for(|state| is_live(state) || state.status == FeedStatus::Unavailable)
                .await
                .map(|state| is_live(&*state))
        })
        .await;

        match ready {
            Ok(Ok(true)) => Ok(subscription),
            Ok(_) => Err(Error::upstream(
                UpstreamErrorKind::Unavailable,
                "upstream event feed is unavailable",
            )),
            Err(_) => Err(Error::upstream(
                UpstreamErrorKind::Timeout,
                "timed out waiting for the upstream event feed",
            )),
        }
    }

    /// Total live session streams.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Live session streams registered for one session.
    pub fn session_connections(&self, session_id: &str) -> usize {
        self.shared.registry.session_connections(session_id)
    }

    pub fn is_feed_running(&self) -> bool {
        self.shared.lock_slot().current.is_some()
    }

    /// Start a new feed generation unless one is already running.
    fn ensure_feed(&self, slot: &mut FeedSlot) -> watch::Receiver<FeedState> {
        if let Some(feed) = &slot.current {
            if !feed.cancel.is_cancelled() {
                return feed.status.clone();
            }
        }

        slot.generation += 1;
        let generation = slot.generation;
        let (status_tx, status_rx) = watch::channel(FeedState::default());
        let cancel = CancellationToken::new();

        let reader = UpstreamReader {
            shared: Arc::clone(&self.shared),
            client: Arc::clone(&self.upstream),
            matcher: self.settings.matcher.clone(),
            policy: self.settings.reconnect.clone(),
            status: status_tx,
            cancel: cancel.clone(),
            generation,
        };
        tokio::spawn(reader.run());
        info!(
            "Starting upstream event feed generation {generation} from {}",
            self.upstream.events_url()
        );

        slot.current = Some(Feed {
            generation,
            cancel,
            status: status_rx.clone(),
        });
        status_rx
    }
}

/// One client's registration. Dropping it deregisters the client.
pub struct Subscription {
    connection_id: ConnectionId,
    session_id: SessionId,
    receiver: mpsc::Receiver<Arc<Payload>>,
    heartbeat_interval: Duration,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Next matching payload, or `None` once the registration has been ended
    /// upstream (feed retired or connection evicted).
    pub async fn recv(&mut self) -> Option<Arc<Payload>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(
            "Unregistering session stream {} for session {}",
            self.connection_id.as_str(),
            self.session_id
        );
        self.shared.release(&self.connection_id);
    }
}
