//! Pending request table: in-flight public HTTP requests awaiting a
//! `Response` from their tunnel.
//!
//! Grounded on the same remove-then-act idiom the teacher's
//! `handle_connection` cleanup uses on `state.sessions` — every terminator
//! goes through `DashMap::remove`, so only the first caller ever observes
//! `Some` and the "exactly one terminator per request" invariant in §4.4
//! falls out of that for free instead of needing a separate lock.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tunnel_protocol::HeaderMap as WireHeaderMap;

/// Metadata captured when a public request is accepted, kept around for
/// the request-log emitted on resolution or timeout.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub request_size: usize,
    pub start_time: Instant,
    pub user_agent: String,
    pub ip: String,
}

/// The response the Edge Dispatcher ultimately writes to the public caller.
#[derive(Debug, Clone)]
pub struct PublicResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl PublicResponse {
    pub fn from_wire(status: u16, headers: Option<WireHeaderMap>, body: Vec<u8>) -> Self {
        let mut flat = Vec::new();
        if let Some(headers) = headers {
            for (name, value) in headers {
                for v in value.values() {
                    flat.push((name.clone(), v.to_string()));
                }
            }
        }
        Self {
            status,
            headers: flat,
            body,
        }
    }
}

struct PendingEntry {
    responder: oneshot::Sender<PublicResponse>,
    meta: RequestMeta,
}

/// Map from request id to its awaiting responder and metadata.
#[derive(Clone)]
pub struct PendingTable {
    entries: Arc<DashMap<String, PendingEntry>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Registers a request awaiting its response, returning the receiving
    /// end of the oneshot the Edge Dispatcher should race against its 30s
    /// timer.
    pub fn add(&self, id: String, meta: RequestMeta) -> oneshot::Receiver<PublicResponse> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, PendingEntry { responder: tx, meta });
        rx
    }

    /// Delivers a response for `id`. Returns `false` if `id` is unknown
    /// (already resolved, timed out, or cancelled) — a late response,
    /// dropped silently by the caller.
    pub fn resolve(&self, id: &str, response: PublicResponse) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => entry.responder.send(response).is_ok(),
            None => false,
        }
    }

    /// Called by the Edge Dispatcher when its local 30s timer wins the
    /// race against the pending oneshot. Removes the entry and returns its
    /// metadata for the request-log record; the dispatcher itself writes
    /// the 504 to the public caller.
    pub fn timeout(&self, id: &str) -> Option<RequestMeta> {
        self.entries.remove(id).map(|(_, entry)| entry.meta)
    }

    /// Discards the entry without writing anything — used only when the
    /// public responder is already gone (e.g. the caller disconnected).
    pub fn cancel(&self, id: &str) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RequestMeta {
        RequestMeta {
            method: "GET".into(),
            path: "/ping".into(),
            request_size: 0,
            start_time: Instant::now(),
            user_agent: "test".into(),
            ip: "127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let table = PendingTable::new();
        let mut rx = table.add("abc".into(), meta());
        assert!(table.resolve(
            "abc",
            PublicResponse {
                status: 200,
                headers: vec![],
                body: b"ok".to_vec()
            }
        ));
        let resp = rx.try_recv().unwrap();
        assert_eq!(resp.status, 200);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn late_resolve_after_timeout_is_dropped() {
        let table = PendingTable::new();
        let _rx = table.add("abc".into(), meta());
        assert!(table.timeout("abc").is_some());
        assert!(!table.resolve(
            "abc",
            PublicResponse {
                status: 200,
                headers: vec![],
                body: vec![]
            }
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let table = PendingTable::new();
        let _rx = table.add("abc".into(), meta());
        table.cancel("abc");
        table.cancel("abc");
        assert!(table.timeout("abc").is_none());
    }
}
