use log::*;
use tokio::net::TcpListener;

pub use service::AppState;

mod controller;
mod error;
mod middleware;
pub mod router;
mod sse;

/// Binds the configured interface and port and serves the proxy until the
/// listener fails.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let config = app_state.config_ref();
    let interface = config.interface.as_deref().unwrap_or("0.0.0.0");
    let listen_addr = format!("{}:{}", interface, config.port);

    let listener = TcpListener::bind(&listen_addr).await?;
    info!(
        "SSE demux proxy listening on {} and forwarding to {}",
        listener.local_addr()?,
        config.upstream_url()
    );

    axum::serve(listener, router::define_routes(app_state.clone())).await
}
