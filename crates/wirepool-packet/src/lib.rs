//! # wirepool-packet
//!
//! Action-tagged framing for payloads that cross a wirepool connection.
//!
//! Every frame is `[action length (1B)][action][content]`. The content has no
//! length of its own: it is everything after the action field.

#![deny(unsafe_code)]

pub mod codec;
pub mod error;

pub use codec::{
    MAX_ACTION_LEN, MAX_MESSAGE_SIZE, Packet, decode, decode_bytes, encode, encode_packet,
    readable_action,
};
pub use error::{PacketError, Result};
