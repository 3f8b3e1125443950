use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use secrecy::SecretString;
use std::time::Duration;

/// Default backend base URL used when `UPSTREAM_URL` is not set.
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:4097";

/// Default path of the backend's global event feed.
pub const DEFAULT_UPSTREAM_EVENTS_PATH: &str = "/global/event";

// Global backend endpoints that clients may never reach through the proxy.
// The event feed itself is only consumed internally, via /sse/{sessionID}.
const DEFAULT_BLOCKED_PREFIXES: &str = "/global/event,/project,/path,/vcs,/instance,/config,\
/provider,/command,/find,/file,/experimental,/lsp,/formatter,/mcp,/agent,/auth";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The base URL of the backend all traffic is proxied to.
    #[arg(long, env, default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    /// Path of the backend's global SSE event feed.
    #[arg(long, env, default_value = DEFAULT_UPSTREAM_EVENTS_PATH)]
    upstream_events_path: String,

    /// Shared bearer token. Clients must present it, and it is sent to the backend.
    /// When empty, every authenticated route is refused.
    #[arg(long, env, hide_env_values = true, default_value = "")]
    api_token: SecretString,

    /// Comma-separated path prefixes that always answer 404.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = DEFAULT_BLOCKED_PREFIXES
    )]
    pub blocked_prefixes: Vec<String>,

    /// Comma-separated payload field names that carry a session identifier.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "sessionID,sessionId"
    )]
    pub session_id_fields: Vec<String>,

    /// Seconds of silence on a session stream before a heartbeat is sent.
    #[arg(long, env, default_value_t = 25)]
    pub heartbeat_interval_secs: u64,

    /// Payloads buffered per session stream before a stalled client is dropped.
    #[arg(long, env, default_value_t = 64)]
    pub session_buffer_capacity: usize,

    /// Timeout in seconds for connecting to the backend. Reads never time out.
    #[arg(long, env, default_value_t = 10)]
    pub upstream_connect_timeout_secs: u64,

    /// Consecutive failed reconnects to the event feed before open streams are ended (0 = never).
    #[arg(long, env, default_value_t = 10)]
    pub upstream_max_reconnect_attempts: u32,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4096)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Backend base URL without a trailing slash.
    pub fn upstream_url(&self) -> &str {
        self.upstream_url.trim_end_matches('/')
    }

    pub fn upstream_events_path(&self) -> &str {
        &self.upstream_events_path
    }

    /// Full URL of the backend's global event feed.
    pub fn events_url(&self) -> String {
        self.upstream_url_for(&self.upstream_events_path)
    }

    /// Backend URL for a client request path (with query string, if any).
    pub fn upstream_url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream_url(), path_and_query)
    }

    pub fn api_token(&self) -> &SecretString {
        &self.api_token
    }

    /// True when `path` starts with a blocked prefix or is the raw event feed.
    pub fn is_blocked_path(&self, path: &str) -> bool {
        path.starts_with(self.upstream_events_path.as_str())
            || self
                .blocked_prefixes
                .iter()
                .filter(|prefix| !prefix.is_empty())
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }
}
