//! Entry point: wires config, shared state, background tasks, and the axum
//! router together. Same shape as the teacher's `main.rs` — load config,
//! build state, spawn the sweeps, serve.

mod config;
mod edge;
mod external;
mod handlers;
mod liveness;
mod outbound;
mod pending;
mod registry;
mod session;
mod state;

use axum::{routing::get, Router};
use config::Config;
use external::{InMemoryUserStore, LoggingEventSink};
use registry::{TunnelRegistry, SWEEP_INTERVAL};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let port = config.port;

    let users = Arc::new(InMemoryUserStore::new());
    let events = Arc::new(LoggingEventSink);
    let state = AppState::new(config, users, events);

    spawn_inactivity_sweep(state.registry.clone());
    tokio::spawn(liveness::run(state.registry.clone()));

    let app = Router::new()
        .route("/ws", get(handlers::ws_handler))
        .fallback(edge::dispatch)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("tunnel-server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Reclaims tunnels that have gone silent past [`registry::INACTIVITY_TIMEOUT`]
/// without waiting on the liveness ping round-trip, for connections that are
/// still technically open but have stopped relaying traffic.
fn spawn_inactivity_sweep(registry: TunnelRegistry) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            for subdomain in registry.stale_subdomains() {
                if let Some(channel) = registry.lookup(&subdomain) {
                    if registry.unregister(&subdomain).is_some() {
                        info!("reclaiming inactive tunnel: {}", subdomain);
                        let _ = channel.send(outbound::OutboundFrame::close(1001, "inactivity timeout"));
                    }
                }
            }
        }
    });
}
