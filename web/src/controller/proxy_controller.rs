use crate::error::{Error, ErrorKind, Result};
use crate::middleware::auth::authorize;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    response::Response,
};
use log::*;
use service::AppState;

// Connection-scoped headers that a proxy must not pass through (RFC 9110 7.6.1),
// plus `host`, which reqwest sets from the upstream URL.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Copies `headers`, leaving out hop-by-hop headers and any header the
/// `Connection` header nominates.
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let nominated: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let hop_by_hop = HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || name.as_str().starts_with("proxy-")
            || nominated.iter().any(|n| n == name.as_str());
        if !hop_by_hop {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Decodes a request path the way the backend ends up routing it: percent
/// escapes resolved, `\` read as `/`, and empty segments collapsed.
///
/// Paths with `.` or `..` segments are refused outright, since URL parsing on
/// the way upstream would rewrite them into a different path.
fn normalize_path(raw: &str) -> core::result::Result<String, ErrorKind> {
    let decoded = urlencoding::decode(raw).map_err(|_| ErrorKind::BadRequest)?;

    let mut normalized = String::with_capacity(decoded.len());
    for segment in decoded
        .split(|c: char| c == '/' || c == '\\')
        .filter(|segment| !segment.is_empty())
    {
        if segment == "." || segment == ".." {
            return Err(ErrorKind::NotFound);
        }
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Fallback for every path not handled locally: forwards the request to the
/// backend at the same path and query and streams the response back.
///
/// Blocked prefixes answer 404 before authorization is checked, so their
/// existence is not revealed to unauthenticated callers either. The blocklist
/// is matched against the normalized path; the raw path is only forwarded once
/// it has passed.
pub async fn forward(State(app_state): State<AppState>, request: Request) -> Result<Response> {
    let config = app_state.config_ref();
    let path = request.uri().path();

    let normalized = normalize_path(path).inspect_err(|_| {
        debug!("Refusing unroutable path {path}");
    })?;
    if config.is_blocked_path(&normalized) {
        debug!("Refusing blocked path {path}");
        return Err(ErrorKind::NotFound.into());
    }

    if !authorize(request.headers(), config.api_token()) {
        return Err(ErrorKind::Unauthorized.into());
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let url = config.upstream_url_for(path_and_query);
    let (parts, body) = request.into_parts();

    trace!("Proxying {} {}", parts.method, url);

    let upstream = app_state
        .http_client
        .request(parts.method, url.as_str())
        .headers(end_to_end_headers(&parts.headers))
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|err| {
            warn!("Upstream request to {url} failed: {err}");
            Error::from(err)
        })?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        *headers = end_to_end_headers(upstream.headers());
    }

    Ok(response.body(Body::from_stream(upstream.bytes_stream()))?)
}
