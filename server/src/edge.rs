//! Edge Dispatcher (§4.5): public HTTP in, `Request`/`Response` over the
//! control channel, HTTP back out.
//!
//! Grounded on the HTTP-over-websocket relay shape other tunnel services in
//! the pack use (e.g. the `dvaar` tunnel route's `send_task`/`recv_task`
//! split and `tyrchen-http-tunnel`'s forwarding handler), adapted to the
//! teacher's axum + single-writer-queue idiom.

use crate::outbound::OutboundFrame;
use crate::pending::RequestMeta;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;
use tunnel_protocol::{ControlMessage, HeaderMap as WireHeaderMap, HeaderValue as WireHeaderValue};

/// Source of truth for how long the public caller waits for a response
/// before the edge gives up and returns 504 (§4.5 step 6, §5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry point for every request that doesn't match a more specific route.
/// Resolves the subdomain from `Host`, then either serves the base-domain
/// surface (landing page / stats) or forwards into a tunnel.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match extract_subdomain(host, &state.config.base_domain) {
        None => base_domain_surface(&state, uri.path()).await,
        Some(subdomain) => forward_to_tunnel(&state, &subdomain, method, uri, headers, body).await,
    }
}

/// Splits the subdomain off `host` by comparing it against the full
/// `base_domain` suffix rather than counting labels (the fix called for in
/// §9's REDESIGN FLAGS — label counting alone misidentifies multi-label
/// base domains). `localhost`/`127.0.0.1` are always "no subdomain".
fn extract_subdomain(host: &str, base_domain: &str) -> Option<String> {
    let host = strip_port(host).to_ascii_lowercase();
    if host == "localhost" || host == "127.0.0.1" {
        return None;
    }
    let base = strip_port(base_domain).to_ascii_lowercase();
    if host == base {
        return None;
    }
    let suffix = format!(".{base}");
    let label = host.strip_suffix(&suffix)?;
    if label.is_empty() || label.contains('.') {
        None
    } else {
        Some(label.to_string())
    }
}

fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

async fn base_domain_surface(state: &AppState, path: &str) -> Response {
    if path == "/api/stats" {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        return Json(json!({
            "activeTunnels": state.registry.active_count(),
            "timestamp": timestamp,
        }))
        .into_response();
    }
    Html(LANDING_PAGE).into_response()
}

const LANDING_PAGE: &str = "<!doctype html><html><head><title>tunl</title></head>\
<body><h1>tunl</h1><p>Reverse HTTP tunnels on stable subdomains.</p></body></html>";

async fn forward_to_tunnel(
    state: &AppState,
    subdomain: &str,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(channel) = state.registry.lookup(subdomain) else {
        return (
            StatusCode::NOT_FOUND,
            format!("No tunnel found for subdomain '{subdomain}'"),
        )
            .into_response();
    };

    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let meta = RequestMeta {
        method: method.to_string(),
        path: uri.to_string(),
        request_size: body.len(),
        start_time: Instant::now(),
        user_agent,
        ip: String::new(),
    };

    let request_msg = ControlMessage::Request {
        request_id: request_id.clone(),
        method: method.to_string(),
        path: uri.to_string(),
        headers: to_wire_headers(&headers),
        body: if body.is_empty() {
            None
        } else {
            Some(BASE64.encode(&body))
        },
    };

    let rx = state.pending.add(request_id.clone(), meta.clone());

    if channel.send(OutboundFrame::Message(request_msg)).is_err() {
        state.pending.cancel(&request_id);
        return (StatusCode::BAD_GATEWAY, "Failed to reach tunnel").into_response();
    }

    tokio::select! {
        result = rx => {
            match result {
                Ok(resp) => {
                    state.events.request_logged(
                        subdomain, &meta.method, &meta.path, resp.status,
                        meta.request_size, resp.body.len(),
                    ).await;
                    build_response(resp.status, resp.headers, resp.body)
                }
                Err(_) => (StatusCode::BAD_GATEWAY, "Tunnel closed before responding").into_response(),
            }
        }
        _ = tokio::time::sleep(DEFAULT_TIMEOUT) => {
            state.pending.timeout(&request_id);
            state.events.request_logged(subdomain, &meta.method, &meta.path, 504, meta.request_size, 0).await;
            (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout").into_response()
        }
    }
}

fn to_wire_headers(headers: &HeaderMap) -> WireHeaderMap {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            grouped.entry(name.to_string()).or_default().push(v.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(k, mut v)| {
            let value = if v.len() == 1 {
                WireHeaderValue::Single(v.remove(0))
            } else {
                WireHeaderValue::Multi(v)
            };
            (k, value)
        })
        .collect()
}

fn build_response(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    match builder.body(axum::body::Body::from(body)) {
        Ok(resp) => resp,
        Err(e) => {
            warn!("failed to build response headers: {}", e);
            (StatusCode::OK, "").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_label_subdomain() {
        assert_eq!(
            extract_subdomain("myapp.localhost:3000", "localhost:3000"),
            Some("myapp".into())
        );
    }

    #[test]
    fn treats_bare_localhost_as_no_subdomain() {
        assert_eq!(extract_subdomain("localhost:3000", "localhost:3000"), None);
        assert_eq!(extract_subdomain("127.0.0.1:3000", "localhost:3000"), None);
    }

    #[test]
    fn compares_full_suffix_not_label_count() {
        // same label count as a naive counter would expect, but not a
        // suffix match against the configured base domain
        assert_eq!(extract_subdomain("evil.co.uk", "example.co.uk"), None);
        assert_eq!(
            extract_subdomain("sub.example.co.uk", "example.co.uk"),
            Some("sub".into())
        );
    }

    #[test]
    fn multi_label_prefix_is_not_a_single_subdomain() {
        assert_eq!(extract_subdomain("a.b.example.com", "example.com"), None);
    }
}
