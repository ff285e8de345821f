//! Connection timing, limits and delivery policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Wire framing mode for outbound data messages, fixed per connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// UTF-8 text frames.
    Text,
    /// Binary frames.
    #[default]
    Binary,
}

/// What a fan-out does when a connection's send buffer is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for room in the buffer.
    #[default]
    Block,
    /// Drop the payload for that connection and count it.
    Drop,
}

/// Interval between liveness pings for a given pong wait: 9/10 of it, so a
/// ping always lands before the peer's read deadline.
pub fn ping_period(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

/// Per-connection timing, limits and policies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// Idle-read deadline in milliseconds, extended on every pong.
    pub pong_wait_ms: u64,
    /// Deadline for a single write in milliseconds.
    pub write_wait_ms: u64,
    /// Largest inbound message accepted, and the outbound frame ceiling.
    pub max_message_size: usize,
    /// Fixed sleep between reconnect attempts in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Capacity of each connection's send channel.
    pub send_buffer: usize,
    /// Payloads held for a disconnected link before pushes are refused.
    pub backlog_capacity: usize,
    /// Fan-out behavior on a full send channel.
    pub backpressure: Backpressure,
    /// Framing mode for outbound data.
    pub message_kind: MessageKind,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
            max_message_size: 5120,
            reconnect_backoff_ms: 1000,
            send_buffer: 256,
            backlog_capacity: 1024,
            backpressure: Backpressure::Block,
            message_kind: MessageKind::Binary,
        }
    }
}

impl SocketSettings {
    /// Smallest accepted pong wait.
    pub const MIN_PONG_WAIT_MS: u64 = 10;

    /// Idle-read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Per-write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Interval between liveness pings, derived from the pong wait.
    pub fn ping_period(&self) -> Duration {
        ping_period(self.pong_wait())
    }

    /// Sleep between reconnect attempts.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Reject values the connection layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pong_wait_ms < Self::MIN_PONG_WAIT_MS {
            return Err(SettingsError::InvalidValue(format!(
                "pongWaitMs must be at least {}",
                Self::MIN_PONG_WAIT_MS
            )));
        }
        if self.write_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "writeWaitMs must be at least 1".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be at least 1".into(),
            ));
        }
        if self.send_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "sendBuffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
