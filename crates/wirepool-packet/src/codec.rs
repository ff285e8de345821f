//! Action-tagged framing.
//!
//! A frame is `[action len: u8][action][content]`. The action is at most 255
//! bytes; the content is opaque and runs to the end of the frame. Encoding
//! checks the whole frame against a ceiling; decoding only checks that the
//! action fits in the buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PacketError, Result};

/// Default frame ceiling in bytes (length prefix + action + content).
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Longest action the one-byte prefix can describe.
pub const MAX_ACTION_LEN: usize = u8::MAX as usize;

/// A decoded frame: an action tag and its opaque content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// Identifies the semantic operation (0-255 bytes).
    pub action: Bytes,
    /// Opaque payload, possibly empty.
    pub content: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(action: impl Into<Bytes>, content: impl Into<Bytes>) -> Self {
        Self {
            action: action.into(),
            content: content.into(),
        }
    }

    /// Size of this packet on the wire.
    pub fn wire_size(&self) -> usize {
        1 + self.action.len() + self.content.len()
    }

    /// Encode against the given ceiling.
    pub fn encode(&self, max_message_size: usize) -> Result<Bytes> {
        encode_packet(&self.action, &self.content, max_message_size)
    }

    /// The action as UTF-8, when it is valid UTF-8.
    pub fn action_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.action).ok()
    }
}

/// Encode `action` and `content` into the wire layout.
///
/// ```text
/// ┌───────────────┬──────────────┬─────────────────────┐
/// │ Action length │ Action       │ Content              │
/// │ (1B)          │ (0-255B)     │ (remainder)          │
/// └───────────────┴──────────────┴─────────────────────┘
/// ```
///
/// Fails with [`PacketError::FrameTooLarge`] when the whole frame exceeds
/// `max_message_size`; nothing is produced in that case.
pub fn encode_packet(action: &[u8], content: &[u8], max_message_size: usize) -> Result<Bytes> {
    if action.len() > MAX_ACTION_LEN {
        return Err(PacketError::ActionTooLong { len: action.len() });
    }
    let size = 1 + action.len() + content.len();
    if size > max_message_size {
        return Err(PacketError::FrameTooLarge {
            size,
            max: max_message_size,
        });
    }

    let mut buf = BytesMut::with_capacity(size);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u8(action.len() as u8);
    buf.put_slice(action);
    buf.put_slice(content);
    Ok(buf.freeze())
}

/// Encode with the default [`MAX_MESSAGE_SIZE`] ceiling.
pub fn encode(action: &[u8], content: &[u8]) -> Result<Bytes> {
    encode_packet(action, content, MAX_MESSAGE_SIZE)
}

/// Decode a frame from a borrowed buffer, copying the fields out.
pub fn decode(src: &[u8]) -> Result<Packet> {
    decode_bytes(Bytes::copy_from_slice(src))
}

/// Decode a frame without copying; the fields share `src`'s storage.
pub fn decode_bytes(src: Bytes) -> Result<Packet> {
    let Some(&prefix) = src.first() else {
        return Err(PacketError::MalformedFrame { len: 0, needed: 1 });
    };
    let end = 1 + usize::from(prefix);
    if src.len() < end {
        return Err(PacketError::MalformedFrame {
            len: src.len(),
            needed: end,
        });
    }

    Ok(Packet {
        action: src.slice(1..end),
        content: src.slice(end..),
    })
}

/// Render an action as the concatenated decimal value of its bytes.
///
/// `[1, 23, 4]` becomes `"1234"`. Only meant for log output; distinct
/// actions can render identically.
pub fn readable_action(action: &[u8]) -> String {
    action.iter().map(u8::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn encode_layout() {
        let frame = encode(b"uid", b"hello").unwrap();
        assert_eq!(&frame[..], b"\x03uidhello");
    }

    #[test]
    fn encode_empty_action_and_content() {
        let frame = encode(b"", b"").unwrap();
        assert_eq!(&frame[..], &[0u8]);
        let packet = decode(&frame).unwrap();
        assert!(packet.action.is_empty());
        assert!(packet.content.is_empty());
    }

    #[test]
    fn encode_at_ceiling_succeeds() {
        let action = vec![b'a'; MAX_ACTION_LEN];
        let content = vec![7u8; MAX_MESSAGE_SIZE - 1 - MAX_ACTION_LEN];
        let frame = encode(&action, &content).unwrap();
        assert_eq!(frame.len(), MAX_MESSAGE_SIZE);

        let packet = decode(&frame).unwrap();
        assert_eq!(packet.action.len(), 255);
        assert_eq!(packet.content.len(), content.len());
    }

    #[test]
    fn encode_one_byte_over_ceiling_fails() {
        let action = vec![b'a'; MAX_ACTION_LEN];
        let content = vec![7u8; MAX_MESSAGE_SIZE - MAX_ACTION_LEN];
        let err = encode(&action, &content).unwrap_err();
        assert_eq!(
            err,
            PacketError::FrameTooLarge {
                size: MAX_MESSAGE_SIZE + 1,
                max: MAX_MESSAGE_SIZE,
            }
        );
    }

    #[test]
    fn encode_respects_custom_ceiling() {
        assert!(encode_packet(b"a", &[0; 5118], 5120).is_ok());
        assert_matches!(
            encode_packet(b"a", &[0; 5119], 5120),
            Err(PacketError::FrameTooLarge { size: 5121, max: 5120 })
        );
    }

    #[test]
    fn encode_rejects_long_action() {
        let action = vec![b'x'; 256];
        assert_matches!(
            encode_packet(&action, b"", usize::MAX),
            Err(PacketError::ActionTooLong { len: 256 })
        );
    }

    #[test]
    fn decode_empty_buffer_is_malformed() {
        assert_matches!(
            decode(&[]),
            Err(PacketError::MalformedFrame { len: 0, needed: 1 })
        );
    }

    #[test]
    fn decode_truncated_action_is_malformed() {
        // Prefix claims 5 action bytes, only 2 follow.
        assert_matches!(
            decode(&[5, b'a', b'b']),
            Err(PacketError::MalformedFrame { len: 3, needed: 6 })
        );
    }

    #[test]
    fn decode_action_without_content() {
        let packet = decode(b"\x02ab").unwrap();
        assert_eq!(&packet.action[..], b"ab");
        assert!(packet.content.is_empty());
    }

    #[test]
    fn decode_bytes_shares_storage() {
        let frame = encode(b"act", b"body").unwrap();
        let packet = decode_bytes(frame.clone()).unwrap();
        assert_eq!(packet.action_str(), Some("act"));
        assert_eq!(&packet.content[..], b"body");
        assert_eq!(packet.wire_size(), frame.len());
    }

    #[test]
    fn packet_encode_uses_given_ceiling() {
        let packet = Packet::new("ping", vec![0u8; 10]);
        assert!(packet.encode(15).is_ok());
        assert_matches!(packet.encode(14), Err(PacketError::FrameTooLarge { .. }));
    }

    #[test]
    fn readable_action_concatenates_decimals() {
        assert_eq!(readable_action(&[1, 23, 4]), "1234");
        assert_eq!(readable_action(b"A"), "65");
        assert_eq!(readable_action(&[]), "");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            action in proptest::collection::vec(any::<u8>(), 0..=MAX_ACTION_LEN),
            content in proptest::collection::vec(any::<u8>(), 0..768),
        ) {
            let frame = encode(&action, &content).unwrap();
            let packet = decode(&frame).unwrap();
            prop_assert_eq!(&packet.action[..], &action[..]);
            prop_assert_eq!(&packet.content[..], &content[..]);
        }
    }
}
