//! Client-role connections that redial after every disconnect.
//!
//! A [`Link`] owns one logical connection to one remote endpoint. The first
//! dial happens in [`Link::build`] and its failure is returned to the caller.
//! After that, every time the pump pair stops the link marks itself
//! disconnected and redials with a fixed backoff until a dial succeeds or
//! [`Link::shutdown`] is called. There is no retry limit.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::error::{Result, SocketError};
use crate::group::Group;
use crate::handler::Handler;
use crate::transport::Dialer;

/// Where a link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No live connection; either backing off or shut down.
    Disconnected,
    /// A dial is in flight.
    Dialing,
    /// Pumps are running on a live connection.
    Active,
}

/// A reconnecting client-role connection.
///
/// Cheap to clone; clones share the same connection and backlog.
pub struct Link<D: Dialer> {
    inner: Arc<LinkInner<D>>,
}

impl<D: Dialer> Clone for Link<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct LinkInner<D: Dialer> {
    id: String,
    dialer: D,
    group: Arc<Group>,
    handler: Arc<dyn Handler>,
    /// Never held across an await.
    slot: Mutex<Slot>,
    /// Held for a whole attach so backlog flushes never interleave.
    flush: tokio::sync::Mutex<()>,
    state: watch::Sender<LinkState>,
    shutdown: CancellationToken,
    backoff: Duration,
    backlog_capacity: usize,
}

#[derive(Default)]
struct Slot {
    conn: Option<Arc<Connection>>,
    backlog: VecDeque<Bytes>,
}

impl<D: Dialer> Link<D> {
    /// Dial `dialer`, register the connection in `group` under `id` and
    /// start its pumps.
    ///
    /// Backoff and backlog bounds come from the group's settings. A failed
    /// first dial is returned as-is; nothing is retried.
    pub async fn build(
        id: impl Into<String>,
        dialer: D,
        handler: Arc<dyn Handler>,
        group: Arc<Group>,
    ) -> Result<Self> {
        let backoff = group.settings().reconnect_backoff();
        let backlog_capacity = group.settings().backlog_capacity;
        let (state, _) = watch::channel(LinkState::Disconnected);
        let inner = Arc::new(LinkInner {
            id: id.into(),
            backoff,
            backlog_capacity,
            dialer,
            group,
            handler,
            slot: Mutex::new(Slot::default()),
            flush: tokio::sync::Mutex::new(()),
            state,
            shutdown: CancellationToken::new(),
        });

        let _ = inner.state.send_replace(LinkState::Dialing);
        let ws = match inner.dialer.dial().await {
            Ok(ws) => ws,
            Err(e) => {
                let _ = inner.state.send_replace(LinkState::Disconnected);
                return Err(e);
            }
        };
        LinkInner::attach(&inner, ws).await;
        info!(link = %inner.id, endpoint = %inner.dialer.target(), "link established");
        Ok(Self { inner })
    }

    /// Link id; also the id of its connection in the group.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.live()
    }

    /// Payloads queued while disconnected.
    pub fn backlog_len(&self) -> usize {
        self.inner.slot.lock().backlog.len()
    }

    /// Enqueue on the live connection, waiting for buffer room.
    ///
    /// Fails with [`SocketError::Disconnected`] when there is none.
    pub async fn push(&self, payload: Bytes) -> Result<()> {
        let conn = self.inner.live().ok_or_else(|| self.inner.disconnected())?;
        conn.send(payload).await
    }

    /// Enqueue on the live connection without waiting.
    ///
    /// Fails with [`SocketError::Disconnected`] when there is none and with
    /// [`SocketError::BufferFull`] when its buffer is full.
    pub fn try_push(&self, payload: Bytes) -> Result<()> {
        let conn = self.inner.live().ok_or_else(|| self.inner.disconnected())?;
        conn.try_send(payload)
    }

    /// Enqueue on the live connection, or queue the payload until the next
    /// successful connect when there is none.
    ///
    /// Waits for buffer room like [`Link::push`]; if the connection closes
    /// during the wait the payload is queued instead. Queued payloads are
    /// flushed in order before anything else is sent on the new connection.
    /// A full backlog rejects the new payload with
    /// [`SocketError::BacklogFull`].
    pub async fn must_push(&self, payload: Bytes) -> Result<()> {
        loop {
            let conn = {
                let mut slot = self.inner.slot.lock();
                match slot.conn.clone().filter(|c| !c.is_closed()) {
                    Some(conn) => conn,
                    None => return self.inner.queue(&mut slot, payload),
                }
            };
            match conn.send(payload.clone()).await {
                Err(SocketError::Closed { .. }) => {}
                other => return other,
            }
        }
    }

    /// Stop reconnecting and force the live connection closed.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let _ = self.inner.slot.lock().conn.take();
        let _ = self.inner.group.close(&self.inner.id).await;
        let _ = self.inner.state.send_replace(LinkState::Disconnected);
        info!(link = %self.inner.id, "link shut down");
    }
}

impl<D: Dialer> std::fmt::Debug for Link<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> LinkInner<D> {
    fn live(&self) -> Option<Arc<Connection>> {
        self.slot.lock().conn.clone().filter(|c| !c.is_closed())
    }

    fn queue(&self, slot: &mut Slot, payload: Bytes) -> Result<()> {
        if slot.backlog.len() >= self.backlog_capacity {
            return Err(SocketError::BacklogFull {
                id: self.id.clone(),
                capacity: self.backlog_capacity,
            });
        }
        slot.backlog.push_back(payload);
        debug!(link = %self.id, queued = slot.backlog.len(), "payload queued while disconnected");
        Ok(())
    }

    fn disconnected(&self) -> SocketError {
        SocketError::Disconnected {
            id: self.id.clone(),
        }
    }

    /// Start pumps on a fresh stream, flush the backlog into it and make it
    /// the live connection.
    async fn attach(inner: &Arc<Self>, ws: WebSocketStream<D::Stream>) {
        let _flushing = inner.flush.lock().await;
        if inner.shutdown.is_cancelled() {
            return;
        }
        let hook: Arc<dyn Handler> = Arc::new(LinkHook {
            link: Arc::downgrade(inner),
        });
        let conn = inner.group.attach(inner.id.clone(), ws, hook).await;

        match flush_backlog(&inner.slot, &conn).await {
            Ok(0) => {}
            Ok(flushed) => debug!(link = %inner.id, flushed, "backlog flushed"),
            Err(e) => {
                warn!(link = %inner.id, error = %e, "backlog flush interrupted");
                return;
            }
        }
        if inner.shutdown.is_cancelled() {
            let _ = inner.slot.lock().conn.take();
            let _ = inner.group.close(&inner.id).await;
            return;
        }
        let _ = inner.state.send_replace(LinkState::Active);
    }

    /// Redial until a dial succeeds or the link is shut down.
    #[instrument(skip_all, fields(link = %inner.id))]
    async fn reconnect(inner: Arc<Self>) {
        inner.slot.lock().conn = None;
        let _ = inner.state.send_replace(LinkState::Disconnected);

        let mut attempts: u64 = 0;
        loop {
            if inner.shutdown.is_cancelled() {
                break;
            }
            attempts += 1;
            let _ = inner.state.send_replace(LinkState::Dialing);
            counter!(crate::metrics::WS_RECONNECT_ATTEMPTS_TOTAL).increment(1);

            let dialed = tokio::select! {
                () = inner.shutdown.cancelled() => break,
                dialed = inner.dialer.dial() => dialed,
            };
            match dialed {
                Ok(ws) => {
                    Self::attach(&inner, ws).await;
                    if inner.shutdown.is_cancelled() {
                        break;
                    }
                    info!(attempts, endpoint = %inner.dialer.target(), "link re-established");
                    return;
                }
                Err(e) if attempts == 1 => {
                    warn!(attempts, error = %e, backoff = ?inner.backoff, "reconnect failed, retrying");
                }
                Err(e) => debug!(attempts, error = %e, "reconnect failed"),
            }

            let _ = inner.state.send_replace(LinkState::Disconnected);
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = time::sleep(inner.backoff) => {}
            }
        }
        let _ = inner.state.send_replace(LinkState::Disconnected);
    }
}

/// Send queued payloads into `conn` in order, then install it as the live
/// connection once the backlog is empty.
///
/// Payloads queued during the flush are sent too. A payload that cannot be
/// sent goes back to the front of the backlog and the connection is not
/// installed.
async fn flush_backlog(slot: &Mutex<Slot>, conn: &Arc<Connection>) -> Result<usize> {
    let mut flushed = 0;
    loop {
        let next = {
            let mut slot = slot.lock();
            let Some(payload) = slot.backlog.pop_front() else {
                slot.conn = Some(Arc::clone(conn));
                return Ok(flushed);
            };
            payload
        };
        if let Err(e) = conn.send(next.clone()).await {
            slot.lock().backlog.push_front(next);
            return Err(e);
        }
        flushed += 1;
    }
}

/// Handler installed on each connection a link starts. Forwards events to
/// the link owner and turns `on_close` into a reconnect.
struct LinkHook<D: Dialer> {
    link: Weak<LinkInner<D>>,
}

impl<D: Dialer> Handler for LinkHook<D> {
    fn on_open(&self, id: &str) {
        if let Some(inner) = self.link.upgrade() {
            inner.handler.on_open(id);
        }
    }

    fn on_read(&self, id: &str, message: Bytes) {
        if let Some(inner) = self.link.upgrade() {
            inner.handler.on_read(id, message);
        }
    }

    fn on_error(&self, id: &str, error: &SocketError) {
        if let Some(inner) = self.link.upgrade() {
            inner.handler.on_error(id, error);
        }
    }

    fn on_close(&self, id: &str) {
        let Some(inner) = self.link.upgrade() else {
            return;
        };
        inner.handler.on_close(id);
        if inner.shutdown.is_cancelled() {
            return;
        }
        let _ = tokio::spawn(LinkInner::reconnect(inner));
    }
}
