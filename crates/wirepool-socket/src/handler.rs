//! The capability set a connection owner implements.

use bytes::Bytes;

use crate::error::SocketError;

/// Callbacks invoked from inside a connection's pump tasks.
///
/// Every method defaults to doing nothing, so implementors override only what
/// they need. Calls are synchronous: a slow `on_read` stalls that
/// connection's read loop.
pub trait Handler: Send + Sync + 'static {
    /// Both pumps are running.
    fn on_open(&self, _id: &str) {}

    /// One inbound data message, unmodified.
    fn on_read(&self, _id: &str, _message: Bytes) {}

    /// The pump pair has terminated and the stream is closed. Fires once
    /// per connection.
    fn on_close(&self, _id: &str) {}

    /// The pump pair terminated because of a fault rather than a normal
    /// peer departure. Always followed by `on_close`.
    fn on_error(&self, _id: &str, _error: &SocketError) {}
}

/// A handler that ignores everything. Stands in for a detached handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReads(AtomicUsize);

    impl Handler for CountingReads {
        fn on_read(&self, _id: &str, _message: Bytes) {
            let _ = self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn noop_handler_accepts_all_events() {
        let handler: Arc<dyn Handler> = Arc::new(NoopHandler);
        handler.on_open("c1");
        handler.on_read("c1", Bytes::from_static(b"x"));
        handler.on_error(
            "c1",
            &SocketError::Closed {
                id: "c1".into(),
            },
        );
        handler.on_close("c1");
    }

    #[test]
    fn partial_handler_keeps_defaults() {
        let handler = CountingReads::default();
        handler.on_open("c1");
        handler.on_read("c1", Bytes::new());
        handler.on_read("c1", Bytes::new());
        handler.on_close("c1");
        assert_eq!(handler.0.load(Ordering::Relaxed), 2);
    }
}
