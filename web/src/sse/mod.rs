//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for `/sse/{sessionID}`.
//! Feed handling, matching and heartbeats live in the `sse` crate.

pub mod handler;
