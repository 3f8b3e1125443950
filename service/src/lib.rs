use config::Config;
use log::{info, warn};
use secrecy::ExposeSecret;
use sse::matcher::SessionMatcher;
use sse::upstream::{ReconnectPolicy, UpstreamClient};
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Builds the HTTP client shared by the event feed and the request proxy.
///
/// Only connecting is bounded; responses stream for as long as the backend
/// keeps them open, so no total request timeout is set.
pub fn init_http_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    info!(
        "Upstream config: url={}, events_path={}, connect_timeout={}s, max_reconnect_attempts={}",
        config.upstream_url(),
        config.upstream_events_path(),
        config.upstream_connect_timeout_secs,
        config.upstream_max_reconnect_attempts,
    );

    reqwest::Client::builder()
        .connect_timeout(config.upstream_connect_timeout())
        .build()
}

/// Session stream settings derived from the process configuration.
pub fn sse_settings(config: &Config) -> sse::Settings {
    sse::Settings {
        matcher: SessionMatcher::new(config.session_id_fields.iter().filter(|f| !f.is_empty())),
        heartbeat_interval: config.heartbeat_interval(),
        buffer_capacity: config.session_buffer_capacity.max(1),
        connect_timeout: config.upstream_connect_timeout(),
        reconnect: ReconnectPolicy::new(config.upstream_max_reconnect_attempts),
    }
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: reqwest::Client,
    pub sse_manager: Arc<sse::Manager>,
}

impl AppState {
    pub fn new(app_config: Config, http_client: reqwest::Client) -> Self {
        if app_config.api_token().expose_secret().is_empty() {
            warn!("API_TOKEN is empty: every authenticated request will be rejected with 401");
        }

        let upstream = UpstreamClient::new(
            http_client.clone(),
            app_config.events_url(),
            app_config.api_token().clone(),
        );
        let sse_manager = Arc::new(sse::Manager::new(upstream, sse_settings(&app_config)));

        Self {
            config: Arc::new(app_config),
            http_client,
            sse_manager,
        }
    }

    pub fn config_ref(&self) -> &Config {
        self.config.as_ref()
    }
}
