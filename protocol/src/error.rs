//! Shared error type for the control-channel wire protocol.

use thiserror::Error;

/// Errors produced while encoding or decoding a [`crate::message::ControlMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame could not be parsed as a known message, or a required
    /// field was missing. The channel stays open; the caller should log
    /// and drop the frame.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The encoded frame exceeds [`crate::codec::MAX_FRAME_SIZE`]. The
    /// caller should close the channel rather than send or accept it.
    #[error("frame too large: {0} bytes (max {max})", max = crate::codec::MAX_FRAME_SIZE)]
    TooLarge(usize),
}
