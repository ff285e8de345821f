//! Action-tag dispatch for inbound packets.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::SocketError;
use crate::handler::{Handler, NoopHandler};
use wirepool_packet::{decode_bytes, readable_action};

/// Handles the content of packets carrying one action.
pub trait ActionHandler: Send + Sync + 'static {
    /// Handle `content` received on connection `id`.
    fn handle(&self, id: &str, content: Bytes);
}

impl<F> ActionHandler for F
where
    F: Fn(&str, Bytes) + Send + Sync + 'static,
{
    fn handle(&self, id: &str, content: Bytes) {
        self(id, content);
    }
}

/// A [`Handler`] that decodes every inbound message as a packet and hands
/// its content to the handler registered for its action.
///
/// Lifecycle events go to an inner handler. Frames that fail to decode are
/// reported to it through `on_error` and otherwise dropped; packets with an
/// unregistered action are logged and dropped.
pub struct ActionRouter {
    routes: HashMap<Bytes, Arc<dyn ActionHandler>>,
    lifecycle: Arc<dyn Handler>,
}

impl ActionRouter {
    /// Create a router with no routes and a no-op lifecycle handler.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            lifecycle: Arc::new(NoopHandler),
        }
    }

    /// Forward open, close and error events to `handler`.
    #[must_use]
    pub fn with_lifecycle(mut self, handler: Arc<dyn Handler>) -> Self {
        self.lifecycle = handler;
        self
    }

    /// Register a handler for an action, replacing any previous one.
    pub fn register(&mut self, action: impl Into<Bytes>, handler: impl ActionHandler) {
        let _ = self.routes.insert(action.into(), Arc::new(handler));
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ActionRouter {
    fn on_open(&self, id: &str) {
        self.lifecycle.on_open(id);
    }

    fn on_read(&self, id: &str, message: Bytes) {
        let packet = match decode_bytes(message) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(conn_id = id, error = %e, "undecodable frame");
                self.lifecycle.on_error(id, &SocketError::Packet(e));
                return;
            }
        };
        let Some(handler) = self.routes.get(&packet.action) else {
            warn!(conn_id = id, action = %readable_action(&packet.action), "no handler for action");
            return;
        };
        debug!(conn_id = id, action = %readable_action(&packet.action), size = packet.content.len(), "dispatching packet");
        handler.handle(id, packet.content);
    }

    fn on_close(&self, id: &str) {
        self.lifecycle.on_close(id);
    }

    fn on_error(&self, id: &str, error: &SocketError) {
        self.lifecycle.on_error(id, error);
    }
}
