use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET liveness probe; never authenticated and never touches the backend.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
