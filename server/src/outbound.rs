//! The single per-connection outbound queue.
//!
//! §5 requires that the control socket, written to from multiple logical
//! paths (the Edge Dispatcher forwarding a `Request`, the register/error
//! replies, the Liveness Supervisor's ping), serialize its writes. Rather
//! than a write lock around the socket, every writer pushes an
//! `OutboundFrame` onto one `mpsc` queue and a single task owns the socket
//! and drains it — the same shape as the teacher's `outbound_task` in
//! `handlers.rs`, widened to carry transport-level ping/pong/close frames
//! alongside `ControlMessage`s.

use axum::extract::ws::{CloseFrame, Message};
use tokio::sync::mpsc::UnboundedSender;
use tunnel_protocol::ControlMessage;

#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Message(ControlMessage),
    Ping,
    Pong(Vec<u8>),
    Close(CloseFrame),
}

impl OutboundFrame {
    pub fn close(code: u16, reason: &'static str) -> Self {
        OutboundFrame::Close(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

impl From<ControlMessage> for OutboundFrame {
    fn from(msg: ControlMessage) -> Self {
        OutboundFrame::Message(msg)
    }
}

/// Translates an [`OutboundFrame`] into the raw websocket message the
/// writer task sends. Returns `None` when the control message fails to
/// encode (logged by the caller; the frame is simply dropped).
pub fn to_ws_message(frame: &OutboundFrame) -> Option<Message> {
    match frame {
        OutboundFrame::Message(msg) => tunnel_protocol::encode(msg)
            .map(|text| Message::Text(text.into()))
            .ok(),
        OutboundFrame::Ping => Some(Message::Ping(Vec::new().into())),
        OutboundFrame::Pong(data) => Some(Message::Pong(data.clone().into())),
        OutboundFrame::Close(frame) => Some(Message::Close(Some(frame.clone()))),
    }
}

pub type ChannelHandle = UnboundedSender<OutboundFrame>;
