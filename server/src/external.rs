//! External collaborators (§6 of the design doc).
//!
//! The account store, quota lookups, and analytics persistence live outside
//! this crate's scope; here they are fixed interfaces plus a standalone
//! in-memory implementation, the same "core talks to a trait, a stub backs
//! it until a real backend is wired in" shape as `bore`'s `BackendClient`
//! or `dvaar`'s `RouteManager`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// A user record as returned by [`UserLookup::lookup`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub tunnel_limit: u32,
    pub is_active: bool,
}

/// Account/quota lookups. Out of the core's scope per §1 — implementations
/// plug in a real account store.
#[async_trait]
pub trait UserLookup: Send + Sync {
    /// Resolves an API key to a user record, or `None` if the key is
    /// unknown or the account inactive.
    async fn lookup(&self, api_key: &str) -> Option<UserRecord>;

    /// Number of tunnels currently live for `user_id`.
    async fn active_tunnel_count(&self, user_id: &str) -> u32;

    /// Called after a tunnel is registered for `user_id`.
    fn note_opened(&self, user_id: &str);

    /// Called after a tunnel owned by `user_id` is torn down.
    fn note_closed(&self, user_id: &str);
}

/// Tunnel lifecycle and request analytics, fire-and-forget per §6: errors
/// are logged locally and must never block dispatch.
#[async_trait]
pub trait TunnelEventSink: Send + Sync {
    async fn tunnel_opened(&self, subdomain: &str, user_id: Option<&str>, ip: &str);
    async fn tunnel_closed(&self, subdomain: &str);
    async fn request_logged(
        &self,
        subdomain: &str,
        method: &str,
        path: &str,
        status: u16,
        request_size: usize,
        response_size: usize,
    );
}

/// A standalone `UserLookup` backed by an in-memory API-key table, for
/// running the server without a separate account service. Keys are seeded
/// at construction (e.g. from a config file) and never persisted.
pub struct InMemoryUserStore {
    users_by_key: DashMap<String, UserRecord>,
    active_counts: DashMap<String, AtomicU32>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            users_by_key: DashMap::new(),
            active_counts: DashMap::new(),
        }
    }

    /// Registers an API key with the given quota. Intended for test setup
    /// and small standalone deployments.
    pub fn add_user(&self, api_key: impl Into<String>, user_id: impl Into<String>, tunnel_limit: u32) {
        let user_id = user_id.into();
        self.users_by_key.insert(
            api_key.into(),
            UserRecord {
                user_id,
                tunnel_limit,
                is_active: true,
            },
        );
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserLookup for InMemoryUserStore {
    async fn lookup(&self, api_key: &str) -> Option<UserRecord> {
        self.users_by_key
            .get(api_key)
            .filter(|u| u.is_active)
            .map(|u| u.clone())
    }

    async fn active_tunnel_count(&self, user_id: &str) -> u32 {
        self.active_counts
            .get(user_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn note_opened(&self, user_id: &str) {
        self.active_counts
            .entry(user_id.to_string())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    fn note_closed(&self, user_id: &str) {
        if let Some(counter) = self.active_counts.get(user_id) {
            counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1))).ok();
        }
    }
}

/// A `TunnelEventSink` that just logs — the default when no analytics
/// backend is configured.
pub struct LoggingEventSink;

#[async_trait]
impl TunnelEventSink for LoggingEventSink {
    async fn tunnel_opened(&self, subdomain: &str, user_id: Option<&str>, ip: &str) {
        info!(
            "tunnel opened: {} (user={}, ip={})",
            subdomain,
            user_id.unwrap_or("-"),
            ip
        );
    }

    async fn tunnel_closed(&self, subdomain: &str) {
        info!("tunnel closed: {}", subdomain);
    }

    async fn request_logged(
        &self,
        subdomain: &str,
        method: &str,
        path: &str,
        status: u16,
        request_size: usize,
        response_size: usize,
    ) {
        info!(
            "{} {} -> {} [{}] {}B req / {}B resp",
            method, path, subdomain, status, request_size, response_size
        );
    }
}

pub type SharedUserLookup = Arc<dyn UserLookup>;
pub type SharedEventSink = Arc<dyn TunnelEventSink>;
