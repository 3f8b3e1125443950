use crate::{
    controller::{health_check_controller, proxy_controller},
    middleware::auth::require_auth,
    sse, AppState,
};
use axum::{middleware::from_fn_with_state, routing::get, Router};

/// Every route the proxy serves. Anything not matched here is forwarded to the backend.
pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(sse_routes(app_state.clone()))
        .merge(proxy_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/healthz", get(health_check_controller::health_check))
}

// `/*session_id` never matches an empty segment, so `/sse/` is routed on its
// own to answer 400 instead of falling through to the proxy.
fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/sse/", get(sse::handler::sse_handler))
        .route("/sse/*session_id", get(sse::handler::sse_handler))
        .route_layer(from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state)
}

fn proxy_routes(app_state: AppState) -> Router {
    Router::new()
        .fallback(proxy_controller::forward)
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, Bytes},
        http::{header, Request, StatusCode},
        response::{IntoResponse, Response},
    };
    use clap::Parser;
    use futures_util::stream;
    use http_body_util::BodyExt;
    use mockito::Matcher;
    use service::config::Config;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    const TOKEN: &str = "s3cret";

    fn app(upstream_url: &str, extra_args: &[&str]) -> Router {
        let mut args = vec![
            "sse-demux-proxy",
            "--upstream-url",
            upstream_url,
            "--api-token",
            TOKEN,
        ];
        args.extend_from_slice(extra_args);
        let config = Config::try_parse_from(args).unwrap();
        let client = service::init_http_client(&config).unwrap();
        define_routes(AppState::new(config, client))
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Reads the next complete `data: ...\n\n` event from a streaming body.
    async fn next_event(body: &mut Body) -> String {
        let mut event = Vec::new();
        while !event.ends_with(b"\n\n") {
            let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
                .await
                .expect("timed out waiting for an event")
                .expect("stream ended")
                .unwrap();
            if let Ok(data) = frame.into_data() {
                event.extend_from_slice(&data);
            }
        }
        String::from_utf8(event).unwrap()
    }

    /// Backend whose global event feed streams whatever is pushed through the sender.
    async fn spawn_event_backend() -> (String, mpsc::UnboundedSender<&'static str>) {
        let (tx, rx) = mpsc::unbounded_channel::<&'static str>();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let backend = Router::new().route(
            "/global/event",
            get(move || {
                let rx = rx.clone();
                async move {
                    let Some(rx) = rx.lock().await.take() else {
                        return StatusCode::SERVICE_UNAVAILABLE.into_response();
                    };
                    let body = stream::unfold(rx, |mut rx| async move {
                        rx.recv()
                            .await
                            .map(|frame| (Ok::<_, Infallible>(Bytes::from(frame)), rx))
                    });
                    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body))
                        .into_response()
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, backend).await.unwrap() });

        (format!("http://{addr}"), tx)
    }

    #[tokio::test]
    async fn test_session_stream_delivers_only_matching_events() {
        let (upstream_url, backend) = spawn_event_backend().await;
        let app = app(&upstream_url, &[]);

        let response = app
            .oneshot(get_request("/sse/abc123", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        backend
            .send("data: {\"sessionID\":\"other\",\"type\":\"msg\"}\n\n")
            .unwrap();
        backend
            .send("data: {\"sessionID\":\"abc123\",\"type\":\"msg\"}\n\n")
            .unwrap();

        let mut body = response.into_body();
        assert_eq!(
            next_event(&mut body).await,
            "data: {\"sessionID\":\"abc123\",\"type\":\"msg\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_session_stream_matches_nested_session_keys() {
        let (upstream_url, backend) = spawn_event_backend().await;
        let app = app(&upstream_url, &[]);

        let response = app
            .oneshot(get_request("/sse/abc123", Some(TOKEN)))
            .await
            .unwrap();
        backend
            .send("data: {\"type\":\"part\",\"properties\":{\"part\":{\"sessionId\":\"abc123\"}}}\n\n")
            .unwrap();

        let mut body = response.into_body();
        assert_eq!(
            next_event(&mut body).await,
            "data: {\"type\":\"part\",\"properties\":{\"part\":{\"sessionId\":\"abc123\"}}}\n\n"
        );
    }

    #[tokio::test]
    async fn test_sse_without_credentials_never_reaches_upstream() {
        let mut server = mockito::Server::new_async().await;
        let feed = server
            .mock("GET", "/global/event")
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let missing = app
            .clone()
            .oneshot(get_request("/sse/abc123", None))
            .await
            .unwrap();
        let wrong = app
            .oneshot(get_request("/sse/abc123", Some("wrong")))
            .await
            .unwrap();

        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_session_id_is_a_bad_request_after_auth() {
        let app = app("http://127.0.0.1:9", &[]);

        let unauthorized = app
            .clone()
            .oneshot(get_request("/sse/", None))
            .await
            .unwrap();
        let authorized = app
            .oneshot(get_request("/sse/", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(authorized.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sse_returns_502_when_event_feed_is_unreachable() {
        // Nothing listens on the loopback discard port.
        let app = app("http://127.0.0.1:9", &[]);

        let response = app
            .oneshot(get_request("/sse/abc123", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_sse_returns_502_when_event_feed_refuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/global/event")
            .with_status(503)
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let response = app
            .oneshot(get_request("/sse/abc123", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_healthz_needs_no_credentials() {
        let app = app("http://127.0.0.1:9", &[]);

        let response = app.oneshot(get_request("/healthz", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_blocked_prefix_is_404_even_when_authorized() {
        let mut server = mockito::Server::new_async().await;
        let backend = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let authorized = app
            .clone()
            .oneshot(get_request("/project/list", Some(TOKEN)))
            .await
            .unwrap();
        let anonymous = app
            .oneshot(get_request("/config", None))
            .await
            .unwrap();

        assert_eq!(authorized.status(), StatusCode::NOT_FOUND);
        assert_eq!(anonymous.status(), StatusCode::NOT_FOUND);
        backend.assert_async().await;
    }

    #[tokio::test]
    async fn test_event_feed_path_is_never_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let feed = server
            .mock("GET", "/global/event")
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &["--blocked-prefixes", "/project"]);

        let response = app
            .oneshot(get_request("/global/event", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_blocklist_cannot_be_bypassed_by_path_tricks() {
        let mut server = mockito::Server::new_async().await;
        let backend = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        for uri in [
            "/x/../project/list",
            "/global/./event",
            "/%70roject/list",
            "//project/list",
            "/session/%2e%2e/global/event",
        ] {
            let response = app
                .clone()
                .oneshot(get_request(uri, Some(TOKEN)))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
        backend.assert_async().await;
    }

    #[tokio::test]
    async fn test_event_feed_is_unreachable_through_encoded_paths() {
        let mut server = mockito::Server::new_async().await;
        let feed = server
            .mock("GET", "/global/event")
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &["--blocked-prefixes", "/project"]);

        for uri in ["/global/./event", "/%67lobal/event", "//global//event"] {
            let response = app
                .clone()
                .oneshot(get_request(uri, Some(TOKEN)))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
        feed.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_forwards_method_path_query_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let backend = server
            .mock("POST", "/session/abc123/message")
            .match_query(Matcher::UrlEncoded("limit".into(), "10".into()))
            .match_header("authorization", "Bearer s3cret")
            .match_header("content-type", "application/json")
            .match_body(r#"{"text":"hi"}"#)
            .with_status(201)
            .with_header("x-backend", "yes")
            .with_body("created")
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let request = Request::builder()
            .method("POST")
            .uri("/session/abc123/message?limit=10")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"hi"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-backend"], "yes");
        assert_eq!(body_text(response).await, "created");
        backend.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_passes_upstream_error_statuses_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/session/missing")
            .with_status(404)
            .with_body("no such session")
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let response = app
            .oneshot(get_request("/session/missing", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "no such session");
    }

    #[tokio::test]
    async fn test_proxy_requires_credentials() {
        let mut server = mockito::Server::new_async().await;
        let backend = server
            .mock("GET", "/session")
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url(), &[]);

        let response = app.oneshot(get_request("/session", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        backend.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_returns_502_when_backend_is_down() {
        let app = app("http://127.0.0.1:9", &[]);

        let response = app
            .oneshot(get_request("/session", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_empty_token_rejects_everything() {
        let config = Config::try_parse_from(["sse-demux-proxy"]).unwrap();
        let client = service::init_http_client(&config).unwrap();
        let app = define_routes(AppState::new(config, client));

        let response = app
            .oneshot(get_request("/session", Some("")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
