//! Dialing and accepting WebSocket streams.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, accept_async_with_config, connect_async_with_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wirepool_settings::SocketSettings;

use crate::error::{Result, SocketError};
use crate::group::Group;
use crate::handler::Handler;

/// Transport limits for a stream whose messages may not exceed
/// `max_message_size` bytes. Oversized messages and frames are refused while
/// being read, before they are buffered whole.
pub fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size))
}

/// Opens client-role streams to one remote endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Underlying byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish a new stream, handshake included.
    async fn dial(&self) -> Result<WebSocketStream<Self::Stream>>;

    /// The endpoint, for logs and errors.
    fn target(&self) -> String;
}

/// Dials a `ws://` (or `wss://`, with a TLS feature enabled) URL.
#[derive(Debug, Clone)]
pub struct UrlDialer {
    url: String,
    max_message_size: usize,
}

impl UrlDialer {
    /// Dial `url` on every attempt, with the default message limit.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: SocketSettings::default().max_message_size,
        }
    }

    /// Refuse inbound messages larger than `bytes`. Match this to the
    /// settings of the group the link attaches to.
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }
}

#[async_trait]
impl Dialer for UrlDialer {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn dial(&self) -> Result<WebSocketStream<Self::Stream>> {
        let config = websocket_config(self.max_message_size);
        let (ws, response) = connect_async_with_config(self.url.as_str(), Some(config), false)
            .await
            .map_err(|e| SocketError::DialFailure {
                target: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!(url = %self.url, status = %response.status(), "dialed");
        Ok(ws)
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// Accept connections on `listener` until `shutdown` fires.
///
/// Each accepted stream is upgraded with the group's message limit (the
/// handshake must finish within the group's write wait), given a fresh UUIDv7 id and attached to `group`
/// with `handler`.
pub async fn serve(
    listener: TcpListener,
    group: Arc<Group>,
    handler: Arc<dyn Handler>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "accepting connections");

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let group = Arc::clone(&group);
        let handler = Arc::clone(&handler);
        let _ = tokio::spawn(async move {
            let handshake_wait = group.settings().write_wait();
            let config = websocket_config(group.settings().max_message_size);
            let upgrade = accept_async_with_config(stream, Some(config));
            let ws = match time::timeout(handshake_wait, upgrade).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    warn!(%peer, error = %e, "websocket handshake failed");
                    return;
                }
                Err(_) => {
                    warn!(%peer, ?handshake_wait, "websocket handshake timed out");
                    return;
                }
            };
            let id = Uuid::now_v7().to_string();
            debug!(%peer, conn_id = %id, "accepted connection");
            let _ = group.attach(id, ws, handler).await;
        });
    }

    info!(%local, "stopped accepting connections");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::tests::{Event, Recorder};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    async fn start_server() -> (
        String,
        Arc<Group>,
        tokio::sync::mpsc::UnboundedReceiver<Event>,
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        start_server_with(SocketSettings::default()).await
    }

    async fn start_server_with(
        settings: SocketSettings,
    ) -> (
        String,
        Arc<Group>,
        tokio::sync::mpsc::UnboundedReceiver<Event>,
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let group = Arc::new(Group::new(settings));
        let (recorder, events) = Recorder::new();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(
            listener,
            Arc::clone(&group),
            recorder,
            shutdown.clone(),
        ));
        (url, group, events, shutdown, task)
    }

    #[tokio::test]
    async fn accepted_connection_gets_uuid_and_registers() {
        let (url, group, mut events, shutdown, task) = start_server().await;
        let mut client = UrlDialer::new(&url).dial().await.unwrap();

        let id = match events.recv().await {
            Some(Event::Open(id)) => id,
            other => panic!("expected open, got {other:?}"),
        };
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
        assert!(group.get(&id).await.is_some());

        client.send(Message::binary(Bytes::from_static(b"ping"))).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Read(id.clone(), Bytes::from_static(b"ping")))
        );

        group.send(&id, Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(
            client.next().await.unwrap().unwrap(),
            Message::Binary(Bytes::from_static(b"pong"))
        );

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn each_connection_gets_distinct_id() {
        let (url, group, mut events, shutdown, task) = start_server().await;
        let _a = UrlDialer::new(&url).dial().await.unwrap();
        let _b = UrlDialer::new(&url).dial().await.unwrap();

        let mut ids = Vec::new();
        while ids.len() < 2 {
            if let Some(Event::Open(id)) = events.recv().await {
                ids.push(id);
            }
        }
        assert_ne!(ids[0], ids[1]);
        assert_eq!(group.len().await, 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dial_refused_is_dial_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let dialer = UrlDialer::new(&url);
        assert_eq!(dialer.target(), url);
        assert_matches!(
            dialer.dial().await,
            Err(SocketError::DialFailure { target, .. }) if target == url
        );
    }

    #[test]
    fn websocket_config_limits_messages_and_frames() {
        let config = websocket_config(64);
        assert_eq!(config.max_message_size, Some(64));
        assert_eq!(config.max_frame_size, Some(64));
    }

    #[tokio::test]
    async fn oversized_inbound_message_fails_connection() {
        let (url, group, mut events, shutdown, task) = start_server_with(SocketSettings {
            max_message_size: 16,
            ..SocketSettings::default()
        })
        .await;
        let mut client = UrlDialer::new(&url).dial().await.unwrap();
        let id = match events.recv().await {
            Some(Event::Open(id)) => id,
            other => panic!("expected open, got {other:?}"),
        };

        client.send(Message::binary(vec![7_u8; 64])).await.unwrap();
        assert_eq!(events.recv().await, Some(Event::Error(id.clone(), false)));
        assert_eq!(events.recv().await, Some(Event::Close(id.clone())));
        assert!(group.get(&id).await.is_none());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dialer_refuses_oversized_inbound_message() {
        let (url, group, mut events, shutdown, task) = start_server().await;
        let mut client = UrlDialer::new(&url).max_message_size(16).dial().await.unwrap();
        let id = match events.recv().await {
            Some(Event::Open(id)) => id,
            other => panic!("expected open, got {other:?}"),
        };

        group.send(&id, Bytes::from(vec![7_u8; 64])).await.unwrap();
        assert_matches!(client.next().await, Some(Err(_)));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
