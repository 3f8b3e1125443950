use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;

use sse::error::{ErrorKind as SseErrorKind, SessionErrorKind};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Every way a request can fail before a response body starts streaming.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Unauthorized,
    BadRequest,
    NotFound,
    BadGateway,
    Internal,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        match &self.source {
            Some(source) => write!(fmt, "{:?}: {source}", self.error_kind),
            None => write!(fmt, "{:?}", self.error_kind),
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "Bad request").into_response(),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ErrorKind::BadGateway => {
                warn!("Responding 502: {self}");
                (StatusCode::BAD_GATEWAY, "Upstream error").into_response()
            }
            ErrorKind::Internal => {
                error!("Responding 500: {self}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(error_kind: ErrorKind) -> Self {
        Self::new(error_kind)
    }
}

impl From<sse::Error> for Error {
    fn from(err: sse::Error) -> Self {
        let error_kind = match err.error_kind {
            SseErrorKind::Session(SessionErrorKind::EmptyId) => ErrorKind::BadRequest,
            SseErrorKind::Upstream(_) => ErrorKind::BadGateway,
            SseErrorKind::Decode => ErrorKind::Internal,
        };

        Self {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::BadRequest
        } else {
            ErrorKind::BadGateway
        };

        Self {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<axum::http::Error> for Error {
    fn from(err: axum::http::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Internal,
        }
    }
}
