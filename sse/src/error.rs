//! Error types for the `sse` crate.
//!
//! Follows the layered pattern used across the workspace: a root `Error`
//! holding an `error_kind` tree plus an optional source. The `web` layer maps
//! the kinds onto HTTP status codes.

use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised by the SSE core.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Session(SessionErrorKind),
    Upstream(UpstreamErrorKind),
    Decode,
}

/// Errors tied to a single client's subscription request.
#[derive(Debug, PartialEq)]
pub enum SessionErrorKind {
    EmptyId,
}

/// Errors reaching or holding the backend's global event feed.
#[derive(Debug, PartialEq)]
pub enum UpstreamErrorKind {
    /// The request to the event endpoint could not be sent.
    Connect,
    /// The event endpoint answered with a non-success status.
    Status(u16),
    /// The shared feed is down and has not recovered.
    Unavailable,
    /// The shared feed did not come up in time.
    Timeout,
}

impl Error {
    pub fn session(kind: SessionErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: ErrorKind::Session(kind),
        }
    }

    pub fn upstream(kind: UpstreamErrorKind, message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: ErrorKind::Upstream(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Session(kind) => write!(f, "Session error: {kind:?}")?,
            ErrorKind::Upstream(kind) => write!(f, "Upstream error: {kind:?}")?,
            ErrorKind::Decode => write!(f, "Decode error")?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = match err.status() {
            Some(status) => UpstreamErrorKind::Status(status.as_u16()),
            None if err.is_timeout() => UpstreamErrorKind::Timeout,
            None => UpstreamErrorKind::Connect,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Upstream(error_kind),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Decode,
        }
    }
}
