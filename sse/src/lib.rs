//! Session-scoped Server-Sent Events demultiplexing.
//!
//! The backend publishes one global SSE feed carrying events for every active
//! session. This crate turns that single feed into independent per-session
//! streams for concurrently connected clients.
//!
//! # Architecture
//!
//! - **Single shared upstream connection**: the first subscriber starts the
//!   feed, the last one to leave stops it. A dropped feed is reconnected with
//!   exponential backoff; when reconnecting is exhausted every open session
//!   stream is ended.
//! - **Dual-index registry**: connections are stored by connection id, and
//!   indexed by session id so each payload is matched once per distinct session.
//! - **Bounded per-client queues**: the feed never waits on a client. A client
//!   whose queue fills up is evicted instead of silently missing events.
//! - **Ephemeral events**: nothing is persisted or replayed. A client only sees
//!   events that arrive while it is registered.
//!
//! # Message Flow
//!
//! 1. A client opens `/sse/{sessionID}`; the web layer calls [`Manager::subscribe`]
//! 2. The subscription is registered, then the feed is started or reused
//! 3. The feed reads frames ([`frame`]), decodes payloads ([`payload`]) and
//!    dispatches each one to sessions the [`matcher`] associates it with
//! 4. [`session`] merges matched payloads with heartbeats into the client's stream
//! 5. When the client disconnects the stream is dropped, which deregisters it
//!
//! # Modules
//!
//! - `frame`: incremental SSE frame parsing
//! - `payload`: JSON payload extraction from frame data lines
//! - `matcher`: recursive session-id matching
//! - `connection`: ConnectionRegistry with dual-index architecture and type-safe ConnectionId
//! - `upstream`: the backend client and the feed task
//! - `manager`: subscription lifecycle and feed coordination
//! - `session`: per-client stream with heartbeats

pub mod connection;
pub mod error;
pub mod frame;
pub mod manager;
pub mod matcher;
pub mod payload;
pub mod session;
pub mod upstream;

pub use error::{Error, ErrorKind};
pub use manager::{Manager, Settings, Subscription};
