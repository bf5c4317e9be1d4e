//! Tunnel registry: subdomain → live control-channel binding.
//!
//! Built the way the teacher's `AppState` wraps its agent/connection maps
//! in `Arc<DashMap<...>>` for lock-free concurrent access, generalized to
//! one subdomain-keyed map plus the quota checks §4.3 requires.

use crate::external::SharedUserLookup;
use crate::outbound::ChannelHandle;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("subdomain already taken")]
    SubdomainTaken,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("tunnel limit reached")]
    TunnelLimitReached,
}

/// A live tunnel binding.
pub struct TunnelEntry {
    pub subdomain: String,
    pub channel: ChannelHandle,
    pub user_id: Option<String>,
    pub ip: String,
    pub connected_at: Instant,
    pub last_activity_at: Instant,
    /// Flipped by the liveness supervisor: set true on pong, false right
    /// before each outgoing ping; a session still false at the next tick
    /// is considered dead.
    pub is_alive: AtomicBool,
}

impl TunnelEntry {
    fn new(subdomain: String, channel: ChannelHandle, user_id: Option<String>, ip: String) -> Self {
        let now = Instant::now();
        Self {
            subdomain,
            channel,
            user_id,
            ip,
            connected_at: now,
            last_activity_at: now,
            is_alive: AtomicBool::new(true),
        }
    }
}

/// The in-memory map from subdomain to active tunnel, plus the inactivity
/// sweep. Cheap to clone — internally `Arc`-backed, same as the teacher's
/// `AppState`.
#[derive(Clone)]
pub struct TunnelRegistry {
    tunnels: Arc<DashMap<String, TunnelEntry>>,
    users: SharedUserLookup,
}

/// How long a tunnel may go without activity before the sweep reclaims it.
pub const INACTIVITY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60 * 60);
/// How often the sweep runs.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

impl TunnelRegistry {
    pub fn new(users: SharedUserLookup) -> Self {
        Self {
            tunnels: Arc::new(DashMap::new()),
            users,
        }
    }

    /// Registers `subdomain` with `channel`. Uniqueness is enforced
    /// atomically via `DashMap::entry`'s shard lock: the first caller to
    /// observe a vacant entry wins, everyone else gets `SubdomainTaken`.
    pub async fn register(
        &self,
        subdomain: &str,
        channel: ChannelHandle,
        api_key: Option<&str>,
        ip: &str,
    ) -> Result<(), RegistryError> {
        let user_id = match api_key {
            Some(key) => {
                let user = self
                    .users
                    .lookup(key)
                    .await
                    .ok_or(RegistryError::InvalidApiKey)?;
                let active = self.users.active_tunnel_count(&user.user_id).await;
                if active >= user.tunnel_limit {
                    return Err(RegistryError::TunnelLimitReached);
                }
                Some(user.user_id)
            }
            None => None,
        };

        match self.tunnels.entry(subdomain.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(RegistryError::SubdomainTaken),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(TunnelEntry::new(
                    subdomain.to_string(),
                    channel,
                    user_id.clone(),
                    ip.to_string(),
                ));
            }
        }

        if let Some(uid) = &user_id {
            self.users.note_opened(uid);
        }
        Ok(())
    }

    /// Returns a clone of the channel handle bound to `subdomain`, if any.
    pub fn lookup(&self, subdomain: &str) -> Option<ChannelHandle> {
        self.tunnels.get(subdomain).map(|e| e.channel.clone())
    }

    /// Idempotent: removes the entry if present and returns the owning
    /// user id (for quota bookkeeping), or `None` if it was already gone.
    pub fn unregister(&self, subdomain: &str) -> Option<Option<String>> {
        self.tunnels.remove(subdomain).map(|(_, entry)| {
            if let Some(uid) = &entry.user_id {
                self.users.note_closed(uid);
            }
            entry.user_id
        })
    }

    pub fn active_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Bumps `last_activity_at` to now. `last_activity_at` only ever moves
    /// forward because every writer sets it to `Instant::now()`, and
    /// `Instant` is itself monotonic.
    pub fn touch(&self, subdomain: &str) {
        if let Some(mut entry) = self.tunnels.get_mut(subdomain) {
            entry.last_activity_at = Instant::now();
        }
    }

    /// Marks a subdomain's liveness flag, used by the liveness supervisor.
    pub fn set_alive(&self, subdomain: &str, alive: bool) {
        if let Some(entry) = self.tunnels.get(subdomain) {
            entry.is_alive.store(alive, Ordering::SeqCst);
        }
    }

    pub fn is_alive(&self, subdomain: &str) -> Option<bool> {
        self.tunnels
            .get(subdomain)
            .map(|e| e.is_alive.load(Ordering::SeqCst))
    }

    /// Subdomains whose last activity is older than [`INACTIVITY_TIMEOUT`].
    pub fn stale_subdomains(&self) -> Vec<String> {
        let cutoff = Instant::now() - INACTIVITY_TIMEOUT;
        self.tunnels
            .iter()
            .filter(|e| e.last_activity_at < cutoff)
            .map(|e| e.subdomain.clone())
            .collect()
    }

    /// All currently registered subdomains, used by the liveness
    /// supervisor's ping sweep.
    pub fn all_subdomains(&self) -> Vec<String> {
        self.tunnels.iter().map(|e| e.subdomain.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryUserStore;
    use tokio::sync::mpsc;

    fn channel() -> ChannelHandle {
        mpsc::unbounded_channel::<crate::outbound::OutboundFrame>().0
    }

    #[tokio::test]
    async fn register_is_exclusive() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        registry
            .register("myapp", channel(), None, "127.0.0.1")
            .await
            .unwrap();
        let err = registry
            .register("myapp", channel(), None, "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::SubdomainTaken);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        registry
            .register("myapp", channel(), None, "127.0.0.1")
            .await
            .unwrap();
        assert!(registry.unregister("myapp").is_some());
        assert!(registry.unregister("myapp").is_none());
        assert!(registry.lookup("myapp").is_none());
    }

    #[tokio::test]
    async fn enforces_quota() {
        let users = Arc::new(InMemoryUserStore::new());
        users.add_user("key1", "user1", 1);
        let registry = TunnelRegistry::new(users);
        registry
            .register("one", channel(), Some("key1"), "127.0.0.1")
            .await
            .unwrap();
        let err = registry
            .register("two", channel(), Some("key1"), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::TunnelLimitReached);
    }

    #[tokio::test]
    async fn rejects_unknown_api_key() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        let err = registry
            .register("one", channel(), Some("nope"), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::InvalidApiKey);
    }

    #[tokio::test]
    async fn concurrent_registration_has_one_winner() {
        let registry = TunnelRegistry::new(Arc::new(InMemoryUserStore::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move {
                r.register("dup", channel(), None, "127.0.0.1").await
            }));
        }
        let mut ok_count = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 1);
    }
}
