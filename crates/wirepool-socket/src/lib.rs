//! # wirepool-socket
//!
//! A pool of long-lived WebSocket connections keyed by string ids.
//!
//! - [`connection`]: the per-connection handle (send channel, close-once guard)
//! - [`pump`]: the read loop / write loop pair that owns one stream
//! - [`heartbeat`]: idle-read deadline and ping cadence
//! - [`group`]: the id → connection registry with send, broadcast and teardown
//! - [`link`]: client-role connections that redial after every disconnect
//! - [`transport`]: dialing and accepting WebSocket streams
//! - [`router`]: action-tag dispatch for inbound packets
//! - [`handler`]: the capability set invoked from inside the pumps

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod group;
pub mod handler;
pub mod heartbeat;
pub mod link;
pub mod logging;
pub mod metrics;
pub mod pump;
pub mod router;
pub mod transport;

pub use connection::Connection;
pub use error::{Result, SocketError};
pub use group::Group;
pub use handler::{Handler, NoopHandler};
pub use link::{Link, LinkState};
pub use pump::{PumpConfig, spawn_pumps};
pub use router::{ActionHandler, ActionRouter};
pub use transport::{Dialer, UrlDialer, serve};

pub use wirepool_packet::{Packet, PacketError};
pub use wirepool_settings::{Backpressure, MessageKind, SocketSettings};
