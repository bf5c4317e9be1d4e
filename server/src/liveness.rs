//! Liveness Supervisor (§4.8): periodic ping sweep over every registered
//! tunnel, reaping ones that never answer.
//!
//! Grounded on the teacher's background sweep task in `main.rs` (a spawned
//! `tokio::time::interval` loop walking the connection map), generalized to
//! flip each tunnel's liveness flag through an outbound ping rather than
//! checking a last-seen timestamp directly, so a tunnel that's merely idle
//! (no HTTP traffic) isn't confused with one that's actually gone.

use crate::outbound::OutboundFrame;
use crate::registry::TunnelRegistry;
use std::time::Duration;
use tracing::info;

/// How often the sweep pings every registered tunnel.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Runs forever, pinging every registered tunnel once per [`PING_INTERVAL`]
/// and dropping any that didn't answer the previous round's ping.
pub async fn run(registry: TunnelRegistry) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        sweep(&registry);
    }
}

fn sweep(registry: &TunnelRegistry) {
    for subdomain in registry.all_subdomains() {
        let Some(channel) = registry.lookup(&subdomain) else {
            continue;
        };
        match registry.is_alive(&subdomain) {
            Some(false) => {
                info!("tunnel failed liveness check, dropping: {}", subdomain);
                if registry.unregister(&subdomain).is_some() {
                    let _ = channel.send(OutboundFrame::close(1001, "liveness check failed"));
                }
            }
            Some(true) => {
                registry.set_alive(&subdomain, false);
                let _ = channel.send(OutboundFrame::Ping);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryUserStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn first_sweep_pings_without_dropping() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("app", tx, None, "127.0.0.1").await.unwrap();

        sweep(&registry);

        assert!(registry.lookup("app").is_some());
        assert_eq!(registry.is_alive("app"), Some(false));
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Ping)));
    }

    #[tokio::test]
    async fn second_sweep_without_pong_drops_tunnel() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("app", tx, None, "127.0.0.1").await.unwrap();

        sweep(&registry);
        sweep(&registry);

        assert!(registry.lookup("app").is_none());
    }

    #[tokio::test]
    async fn pong_between_sweeps_keeps_tunnel_alive() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("app", tx, None, "127.0.0.1").await.unwrap();

        sweep(&registry);
        registry.set_alive("app", true);
        sweep(&registry);

        assert!(registry.lookup("app").is_some());
    }
}
