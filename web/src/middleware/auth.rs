use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use service::AppState;
use subtle::ConstantTimeEq;

use crate::error::{Error, ErrorKind};

/// True when the request carries `Authorization: Bearer <token>` for the configured token.
///
/// An empty configured token authorizes nothing.
pub(crate) fn authorize(headers: &HeaderMap, token: &SecretString) -> bool {
    let expected = token.expose_secret();
    if expected.is_empty() {
        return false;
    }

    let Some(presented) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.as_bytes().strip_prefix(b"Bearer "))
    else {
        return false;
    };

    // Constant-time comparison so the token can't be guessed byte by byte
    presented.ct_eq(expected.as_bytes()).into()
}

/// Authentication middleware that returns 401 Unauthorized unless the request
/// presents the shared bearer token.
pub async fn require_auth(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if authorize(request.headers(), app_state.config_ref().api_token()) {
        next.run(request).await
    } else {
        Error::new(ErrorKind::Unauthorized).into_response()
    }
}
