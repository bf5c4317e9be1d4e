//! Shared application state, cloned into every axum handler — same role as
//! the teacher's `AppState`, now wrapping the tunnel registry, the pending
//! request table, the server config, and the external collaborators.

use crate::config::Config;
use crate::external::{SharedEventSink, SharedUserLookup};
use crate::pending::PendingTable;
use crate::registry::TunnelRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: TunnelRegistry,
    pub pending: PendingTable,
    pub config: Arc<Config>,
    pub users: SharedUserLookup,
    pub events: SharedEventSink,
}

impl AppState {
    pub fn new(config: Config, users: SharedUserLookup, events: SharedEventSink) -> Self {
        Self {
            registry: TunnelRegistry::new(users.clone()),
            pending: PendingTable::new(),
            config: Arc::new(config),
            users,
            events,
        }
    }
}
