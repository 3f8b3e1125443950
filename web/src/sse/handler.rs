use crate::error::Result;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use log::*;
use service::AppState;
use sse::session;
use std::convert::Infallible;

/// SSE handler that streams one session's slice of the backend's global feed.
///
/// The session stream is registered before the response is built, so events
/// published after the client got its headers are never missed. Heartbeats are
/// produced by the session stream itself, not by an axum keep-alive.
pub(crate) async fn sse_handler(
    State(app_state): State<AppState>,
    session_id: Option<Path<String>>,
) -> Result<Sse<impl Stream<Item = core::result::Result<Event, Infallible>>>> {
    let session_id = session_id.map(|Path(id)| id).unwrap_or_default();
    debug!("Establishing SSE connection for session {session_id}");

    let subscription = app_state.sse_manager.subscribe(&session_id).await?;

    info!(
        "SSE connection {} opened for session {} ({} open)",
        subscription.connection_id().as_str(),
        session_id,
        app_state.sse_manager.connection_count()
    );

    Ok(Sse::new(session::session_events(subscription)))
}
