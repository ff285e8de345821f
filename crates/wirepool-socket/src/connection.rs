//! The handle for one peer-facing stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SocketError};
use crate::handler::{Handler, NoopHandler};
use wirepool_settings::MessageKind;

/// One logical peer-facing stream.
///
/// The stream itself is owned by the pump pair; this handle carries what
/// the rest of the process needs: the id, the send channel, the handler and
/// the close-once guard. A closed handle is never reopened; a reconnect
/// builds a new handle under the same id.
pub struct Connection {
    id: String,
    kind: MessageKind,
    tx: mpsc::Sender<Bytes>,
    handler: RwLock<Arc<dyn Handler>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    close_reason: Mutex<Option<String>>,
    connected_at: Instant,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a handle around an existing send channel.
    pub fn new(
        id: impl Into<String>,
        kind: MessageKind,
        tx: mpsc::Sender<Bytes>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            kind,
            tx,
            handler: RwLock::new(handler),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            close_reason: Mutex::new(None),
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a handle with a fresh send channel of `buffer` slots.
    ///
    /// The receiver belongs to the write loop.
    pub fn channel(
        id: impl Into<String>,
        kind: MessageKind,
        handler: Arc<dyn Handler>,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self::new(id, kind, tx, handler)), rx)
    }

    /// Stable external identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Framing mode for outbound data.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The handler currently attached.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler.read())
    }

    /// Swap in a no-op handler so no further events are dispatched.
    pub fn detach_handler(&self) {
        *self.handler.write() = Arc::new(NoopHandler);
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a payload, waiting for room in the channel.
    ///
    /// A wait in progress ends with [`SocketError::Closed`] as soon as the
    /// handle is closed.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(self.closed_error()),
            sent = self.tx.send(payload) => sent.map_err(|_| self.closed_error()),
        }
    }

    /// Enqueue a payload without waiting.
    ///
    /// A full channel drops the payload, bumps the drop counter and returns
    /// [`SocketError::BufferFull`].
    pub fn try_send(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SocketError::BufferFull {
                    id: self.id.clone(),
                })
            }
            Err(TrySendError::Closed(_)) => Err(self.closed_error()),
        }
    }

    /// Close the handle: the write loop sends a close frame and both pumps
    /// wind down.
    ///
    /// Safe to call from any number of places; returns `true` only for the
    /// call that actually closed it.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    /// Close with a reason carried in the close frame.
    pub fn close_with(&self, reason: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        *self.close_reason.lock() = Some(reason.into());
        self.close()
    }

    /// Resolves once the handle is closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Record that the peer proved it is alive.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong (or since creation).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Payloads dropped because the channel was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the handle was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn closed_error(&self) -> SocketError {
        SocketError::Closed {
            id: self.id.clone(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
