//! Tunnel Forwarder (§4.7): the client's half of the control channel.
//! Registers, serves `Request`s against a local HTTP server, and manages
//! heartbeat and reconnection.
//!
//! Grounded on the teacher's `run_agent_loop` (`agent.rs`): connect, split
//! the socket, drain an outbound queue from a dedicated task, dispatch
//! inbound frames, clean up and reconnect. The per-stream relay the teacher
//! spawns in `relay.rs` becomes a per-request `reqwest` call here, since
//! this forwarder proxies HTTP semantics rather than raw bytes.

use crate::backoff::Backoff;
use crate::cli::Cli;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap as ReqHeaderMap, HeaderName, HeaderValue as ReqHeaderValue};
use std::error::Error as _;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};
use tunnel_protocol::{ControlMessage, HeaderMap as WireHeaderMap, HeaderValue as WireHeaderValue};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(90);
const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BODY: usize = 100 * 1024 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

const FATAL_SUBSTRINGS: &[&str] = &[
    "subdomain already taken",
    "invalid subdomain",
    "invalid api key",
    "tunnel limit reached",
    "registration failed",
    "rate limit exceeded",
    "message too large",
];

fn is_fatal(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    FATAL_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

enum Outcome {
    Reconnect,
    Fatal,
}

/// Runs the forwarder forever: connect, serve, reconnect with backoff.
/// Returns only when a fatal server error or an exhausted backoff cap ends
/// the process.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(LOCAL_REQUEST_TIMEOUT)
        .build()?;
    let mut backoff = Backoff::new(cli.max_reconnect_attempts);

    loop {
        match run_once(&cli, &http, &mut backoff).await {
            Outcome::Fatal => {
                return Err(anyhow::anyhow!("fatal server error, not reconnecting"));
            }
            Outcome::Reconnect => match backoff.next_delay() {
                Some(delay) => {
                    info!("reconnecting in {:.1}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(anyhow::anyhow!("exceeded reconnect attempt limit"));
                }
            },
        }
    }
}

async fn run_once(cli: &Cli, http: &reqwest::Client, backoff: &mut Backoff) -> Outcome {
    info!("connecting to {}", cli.server);
    let (ws_stream, _) = match connect_async(&cli.server).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("connection failed: {}", e);
            return Outcome::Reconnect;
        }
    };
    info!("connected");

    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let outbound = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let register = ControlMessage::Register {
        subdomain: cli.subdomain.clone(),
        api_key: cli.api_key.clone(),
    };
    if send_control(&tx, register).is_err() {
        outbound.abort();
        return Outcome::Reconnect;
    }

    let mut last_pong = Instant::now();
    let mut fatal = false;
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    warn!("no pong in {:.0}s, terminating channel", PONG_TIMEOUT.as_secs_f64());
                    break;
                }
                let _ = tx.send(Message::Ping(Vec::new().into()));
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match tunnel_protocol::decode(&text) {
                            Ok(msg) => {
                                if handle_message(cli, http, &tx, backoff, msg).await {
                                    fatal = true;
                                    break;
                                }
                            }
                            Err(e) => warn!("malformed control message: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("websocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    outbound.abort();
    if fatal {
        Outcome::Fatal
    } else {
        Outcome::Reconnect
    }
}

/// Handles one decoded control message. Returns `true` if the error was
/// fatal and the forwarder should give up instead of reconnecting.
async fn handle_message(
    cli: &Cli,
    http: &reqwest::Client,
    tx: &mpsc::UnboundedSender<Message>,
    backoff: &mut Backoff,
    msg: ControlMessage,
) -> bool {
    match msg {
        ControlMessage::Registered { subdomain, url } => {
            info!("registered as {} -> {}", subdomain, url);
            println!("Forwarding https://{subdomain} -> 127.0.0.1:{}", cli.port);
            println!("Public URL: {url}");
            backoff.reset();
            false
        }
        ControlMessage::Request { request_id, method, path, headers, body } => {
            let tx = tx.clone();
            let http = http.clone();
            let port = cli.port;
            tokio::spawn(async move {
                serve_request(&http, port, request_id, method, path, headers, body, &tx).await;
            });
            false
        }
        ControlMessage::Error { message } => {
            error!("server error: {}", message);
            is_fatal(&message)
        }
        ControlMessage::Unknown => false,
        ControlMessage::Register { .. } | ControlMessage::Response { .. } => false,
    }
}

fn send_control(tx: &mpsc::UnboundedSender<Message>, msg: ControlMessage) -> Result<(), ()> {
    let text = tunnel_protocol::encode(&msg).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).map_err(|_| ())
}

/// Issues the local HTTP request described by a `Request` and sends back
/// the matching `Response`. Connection errors are translated to the fixed
/// status table in §4.7; if the control channel has since closed, the send
/// is simply dropped.
async fn serve_request(
    http: &reqwest::Client,
    local_port: u16,
    request_id: String,
    method: String,
    path: String,
    headers: WireHeaderMap,
    body: Option<String>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let decoded_body = match body {
        Some(b) => match BASE64.decode(&b) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("malformed base64 body for {}: {}", request_id, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let url = format!("http://127.0.0.1:{local_port}{path}");
    let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut req_headers = ReqHeaderMap::new();
    for (name, value) in &headers {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if name.eq_ignore_ascii_case("content-length") {
            continue; // reqwest derives this from the body it's given
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for v in value.values() {
            if let Ok(header_value) = ReqHeaderValue::from_str(v) {
                req_headers.append(header_name.clone(), header_value);
            }
        }
    }

    let has_body = !decoded_body.is_empty();
    let mut builder = http.request(method, url.as_str()).headers(req_headers);
    if has_body {
        builder = builder.body(decoded_body);
    }

    let response_msg = match builder.send().await {
        Ok(resp) => build_response(request_id.clone(), resp).await,
        Err(e) => {
            let (status, text) = classify_error(&e);
            ControlMessage::Response {
                request_id: request_id.clone(),
                status_code: status,
                headers: None,
                body: Some(text.to_string()),
            }
        }
    };

    let _ = send_control(tx, response_msg);
}

async fn build_response(request_id: String, resp: reqwest::Response) -> ControlMessage {
    let status_code = resp.status().as_u16();
    let headers = to_wire_headers(resp.headers());

    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    let mut overflowed = false;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if body.len() + bytes.len() > MAX_RESPONSE_BODY {
                    overflowed = true;
                    break;
                }
                body.extend_from_slice(&bytes);
            }
            Err(_) => break,
        }
    }

    if overflowed {
        return ControlMessage::Response {
            request_id,
            status_code: 413,
            headers: None,
            body: Some("Response body exceeded 100 MiB".to_string()),
        };
    }

    ControlMessage::Response {
        request_id,
        status_code,
        headers: if headers.is_empty() { None } else { Some(headers) },
        body: if body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&body).into_owned())
        },
    }
}

fn classify_error(e: &reqwest::Error) -> (u16, &'static str) {
    if e.is_timeout() {
        (504, "Local server request timed out")
    } else if e.is_connect() {
        let refused = e
            .source()
            .map(|s| s.to_string().to_ascii_lowercase().contains("connection refused"))
            .unwrap_or(false);
        if refused {
            (503, "Connection refused by local server")
        } else {
            (502, "Could not reach local server")
        }
    } else {
        (502, "Error forwarding request to local server")
    }
}

fn to_wire_headers(headers: &ReqHeaderMap) -> WireHeaderMap {
    use std::collections::HashMap;
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("keep-alive") {
            continue;
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_fatal_errors_case_insensitively() {
        assert!(is_fatal("Invalid Subdomain: ab"));
        assert!(is_fatal("RATE LIMIT EXCEEDED"));
        assert!(!is_fatal("temporary hiccup"));
    }
}
