use crate::matcher::SessionMatcher;
use crate::payload::Payload;
use dashmap::DashMap;
use log::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

/// Client-supplied session identifier, taken from the request path.
pub type SessionId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection information (no redundant connection_id)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub session_id: SessionId,
    pub sender: Sender<Arc<Payload>>,
}

/// Outcome of offering one payload to every registered connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: usize,
    pub evicted: usize,
}

/// Connection registry with dual indices for O(1) lookups
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: session_id -> connections, so each distinct session is matched once per payload
    session_index: DashMap<SessionId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            session_index: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, session_id: SessionId, sender: Sender<Arc<Payload>>) -> ConnectionId {
        let connection_id = ConnectionId::new();

        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                session_id: session_id.clone(),
                sender,
            },
        );

        self.session_index
            .entry(session_id)
            .or_default()
            .insert(connection_id.clone());

        connection_id
    }

    /// Unregister a connection - O(1). Returns false if it was already gone.
    ///
    /// Removing the entry drops its sender, which ends the client's stream once
    /// any payloads already queued have been drained.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, info)) = self.connections.remove(connection_id) else {
            return false;
        };

        if let Some(mut entry) = self.session_index.get_mut(&info.session_id) {
            entry.remove(connection_id);
        }
        self.session_index
            .remove_if(&info.session_id, |_, connection_ids| connection_ids.is_empty());

        true
    }

    /// Drop every registration, ending all client streams.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        self.session_index.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of live connections registered for one session.
    pub fn session_connections(&self, session_id: &str) -> usize {
        self.session_index
            .get(session_id)
            .map_or(0, |connection_ids| connection_ids.len())
    }

    /// Offer a payload to every connection whose session it matches - O(s) matches
    /// where s = distinct sessions, plus O(k) sends where k = matching connections.
    ///
    /// Sends never wait. A connection whose queue is full (a stalled client) or
    /// whose receiver is gone is evicted so it can't hold back anyone else.
    pub fn dispatch(&self, payload: &Arc<Payload>, matcher: &SessionMatcher) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut evict = Vec::new();

        for entry in self.session_index.iter() {
            if !matcher.matches(payload.value(), entry.key()) {
                continue;
            }

            for conn_id in entry.value().iter() {
                let Some(info) = self.connections.get(conn_id) else {
                    continue;
                };
                match info.sender.try_send(Arc::clone(payload)) {
                    Ok(()) => dispatch.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Connection {} for session {} is not keeping up; evicting it",
                            conn_id.as_str(),
                            entry.key()
                        );
                        evict.push(conn_id.clone());
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(
                            "Connection {} closed before delivery; cleaning up",
                            conn_id.as_str()
                        );
                        evict.push(conn_id.clone());
                    }
                }
            }
        }

        // Index guards must be released before removing entries.
        for conn_id in evict {
            if self.unregister(&conn_id) {
                dispatch.evicted += 1;
            }
        }

        dispatch
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
