//! The id → connection registry.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{Result, SocketError};
use crate::handler::Handler;
use crate::pump::{self, PumpConfig};
use wirepool_packet::{encode_packet, readable_action};
use wirepool_settings::{Backpressure, SocketSettings};

/// Reason carried in the close frame of a forced close.
const CLOSE_REASON: &str = "bye";

/// Live connections indexed by id.
///
/// One mutex guards the map; lookups clone the handle out and release the
/// lock before enqueueing, and every enqueue checks the handle's closed flag,
/// so a send racing a close is reported as [`SocketError::Closed`].
pub struct Group {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    settings: SocketSettings,
}

impl Group {
    /// Create an empty group.
    pub fn new(settings: SocketSettings) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Settings applied to connections attached through this group.
    pub fn settings(&self) -> &SocketSettings {
        &self.settings
    }

    /// Register a handle under its id.
    ///
    /// An existing handle with the same id is replaced and returned. Closing
    /// it first is the caller's job; the group does not.
    pub async fn add(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut conns = self.connections.lock().await;
        let replaced = conns.insert(conn.id().to_owned(), conn);
        if let Some(old) = &replaced {
            warn!(conn_id = %old.id(), closed = old.is_closed(), "replaced registered connection");
        }
        replaced
    }

    /// Look up a handle.
    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.lock().await.get(id).cloned()
    }

    /// Enqueue `payload` for the connection registered as `id`.
    ///
    /// With [`Backpressure::Block`] this waits for room in the connection's
    /// buffer; with [`Backpressure::Drop`] a full buffer drops the payload
    /// and returns [`SocketError::BufferFull`].
    pub async fn send(&self, id: &str, payload: Bytes) -> Result<()> {
        let Some(conn) = self.get(id).await else {
            warn!(conn_id = id, "send target not found");
            counter!(crate::metrics::WS_SEND_TARGET_MISSING_TOTAL).increment(1);
            return Err(SocketError::TargetNotFound { id: id.to_owned() });
        };
        self.enqueue(&conn, payload).await
    }

    /// Encode a packet with the configured ceiling and send it.
    pub async fn send_packet(&self, id: &str, action: &[u8], content: &[u8]) -> Result<()> {
        let payload = encode_packet(action, content, self.settings.max_message_size)?;
        debug!(conn_id = id, action = %readable_action(action), size = payload.len(), "sending packet");
        self.send(id, payload).await
    }

    /// Enqueue `payload` on every registered connection.
    ///
    /// Returns how many connections accepted it. Failures are logged and
    /// skipped.
    pub async fn broadcast(&self, payload: Bytes) -> usize {
        let targets: Vec<_> = self.connections.lock().await.values().cloned().collect();
        let mut delivered = 0;
        for conn in &targets {
            match self.enqueue(conn, payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(conn_id = %conn.id(), error = %e, "broadcast send failed"),
            }
        }
        debug!(recipients = targets.len(), delivered, "broadcast");
        delivered
    }

    /// Detach the handler and drop the handle from the registry.
    ///
    /// The stream is left alone; the pumps close it when they finish.
    pub async fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let conn = self.connections.lock().await.remove(id)?;
        conn.detach_handler();
        Some(conn)
    }

    /// Force a connection closed: detach its handler, send a close frame and
    /// drop it from the registry.
    pub async fn close(&self, id: &str) -> Result<()> {
        let conn = self
            .remove(id)
            .await
            .ok_or_else(|| SocketError::TargetNotFound { id: id.to_owned() })?;
        let _ = conn.close_with(CLOSE_REASON);
        debug!(conn_id = id, "connection closed by owner");
        Ok(())
    }

    /// Force every connection closed. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.detach_handler();
            let _ = conn.close_with(CLOSE_REASON);
        }
        debug!(count = drained.len(), "closed all connections");
        drained.len()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Ids of the registered connections, in no particular order.
    pub async fn ids(&self) -> Vec<String> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Wrap an established stream in a handle, register it and launch its
    /// pump pair.
    ///
    /// When the pumps stop the handle is removed again (unless something
    /// else has since been registered under the id) before `on_close` fires.
    pub async fn attach<S>(
        self: &Arc<Self>,
        id: impl Into<String>,
        ws: WebSocketStream<S>,
        handler: Arc<dyn Handler>,
    ) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (conn, rx) = Connection::channel(
            id,
            self.settings.message_kind,
            handler,
            self.settings.send_buffer,
        );
        let _ = self.add(Arc::clone(&conn)).await;

        let group = Arc::clone(self);
        let task_conn = Arc::clone(&conn);
        let config = PumpConfig::from_settings(&self.settings);
        let _ = tokio::spawn(async move {
            let exit = pump::run_pumps(Arc::clone(&task_conn), rx, ws, config).await;
            group.evict(&task_conn).await;
            pump::report_exit(&task_conn, exit);
        });
        conn
    }

    /// Remove `conn` if it is still the handle registered under its id.
    pub(crate) async fn evict(&self, conn: &Arc<Connection>) {
        let mut conns = self.connections.lock().await;
        if conns.get(conn.id()).is_some_and(|c| Arc::ptr_eq(c, conn)) {
            let _ = conns.remove(conn.id());
        }
    }

    async fn enqueue(&self, conn: &Connection, payload: Bytes) -> Result<()> {
        let result = match self.settings.backpressure {
            Backpressure::Block => conn.send(payload).await,
            Backpressure::Drop => conn.try_send(payload),
        };
        if result.is_err() {
            counter!(crate::metrics::WS_SEND_DROPS_TOTAL).increment(1);
        }
        result
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new(SocketSettings::default())
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
