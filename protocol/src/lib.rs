//! # tunnel-protocol
//!
//! Shared wire types for the tunnel relay: the [`message::ControlMessage`]
//! enum, its [`codec`], and the [`subdomain`] policy. Both `tunnel-server`
//! and `tunl` depend on this crate so the two sides can never drift apart
//! on field names or frame limits.

pub mod codec;
pub mod error;
pub mod message;
pub mod subdomain;

pub use codec::{decode, encode, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{ControlMessage, HeaderMap, HeaderValue};
