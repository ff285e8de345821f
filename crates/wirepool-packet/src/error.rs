//! Packet error types.

use thiserror::Error;

/// Errors produced while encoding or decoding a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// The encoded frame would exceed the configured ceiling.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Size the frame would have had.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// The action does not fit in the one-byte length prefix.
    #[error("action of {len} bytes exceeds the 255 byte limit")]
    ActionTooLong {
        /// Length of the rejected action.
        len: usize,
    },
    /// The buffer is shorter than its own action prefix claims.
    #[error("malformed frame: {len} bytes available, {needed} needed")]
    MalformedFrame {
        /// Bytes present in the buffer.
        len: usize,
        /// Bytes required by the action prefix.
        needed: usize,
    },
}

/// Result type for packet operations.
pub type Result<T> = std::result::Result<T, PacketError>;
