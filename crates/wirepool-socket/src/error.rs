//! Connection-layer error types.

use thiserror::Error;
use wirepool_packet::PacketError;

/// Errors surfaced by connections, the group and links.
#[derive(Debug, Error)]
pub enum SocketError {
    /// A packet could not be encoded or decoded.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The peer went away or the stream ended; normal teardown.
    #[error("connection {id} lost: {reason}")]
    ConnectionLost {
        /// Connection id.
        id: String,
        /// What ended the stream.
        reason: String,
    },
    /// Any other read or write failure, including a missed read deadline.
    #[error("transport failure on {id}: {reason}")]
    TransportFailure {
        /// Connection id.
        id: String,
        /// Underlying failure.
        reason: String,
    },
    /// No connection is registered under the id.
    #[error("no connection registered as {id}")]
    TargetNotFound {
        /// Requested id.
        id: String,
    },
    /// The link has no live connection right now.
    #[error("link {id} is disconnected")]
    Disconnected {
        /// Link id.
        id: String,
    },
    /// The connection has already been closed.
    #[error("connection {id} is closed")]
    Closed {
        /// Connection id.
        id: String,
    },
    /// The connection's send channel is full and the payload was dropped.
    #[error("send buffer full for {id}")]
    BufferFull {
        /// Connection id.
        id: String,
    },
    /// The disconnected-link backlog is at capacity.
    #[error("backlog for {id} is full ({capacity} queued)")]
    BacklogFull {
        /// Link id.
        id: String,
        /// Backlog capacity.
        capacity: usize,
    },
    /// Dialing the remote endpoint failed.
    #[error("dial {target} failed: {reason}")]
    DialFailure {
        /// Endpoint that was dialed.
        target: String,
        /// Underlying failure.
        reason: String,
    },
    /// Socket-level I/O error outside a connection (bind, accept).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SocketError {
    /// Whether this is an expected teardown rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Result type for connection-layer operations.
pub type Result<T> = std::result::Result<T, SocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lost_is_expected() {
        let err = SocketError::ConnectionLost {
            id: "c1".into(),
            reason: "going away".into(),
        };
        assert!(err.is_expected());
        assert_eq!(err.to_string(), "connection c1 lost: going away");
    }

    #[test]
    fn transport_failure_is_not_expected() {
        let err = SocketError::TransportFailure {
            id: "c1".into(),
            reason: "broken".into(),
        };
        assert!(!err.is_expected());
    }

    #[test]
    fn packet_error_converts() {
        let err: SocketError = PacketError::FrameTooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, SocketError::Packet(_)));
        assert!(err.to_string().contains("exceeds the 5 byte limit"));
    }

    #[test]
    fn target_not_found_display() {
        let err = SocketError::TargetNotFound { id: "ghost".into() };
        assert_eq!(err.to_string(), "no connection registered as ghost");
    }
}
