//! The read loop / write loop pair that owns one WebSocket stream.
//!
//! The read loop runs inline in the pump task and hands every data message
//! to the connection's handler. The write loop runs as a spawned task and is
//! the only writer: queued payloads, heartbeat pings and the final close
//! frame all go through it. Whichever loop stops first closes the handle,
//! which stops the other one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::error::SocketError;
use crate::heartbeat::{self, ReadDeadline};
use wirepool_settings::{MessageKind, SocketSettings};

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Deadlines and limits for one pump pair.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Idle-read deadline, extended by every pong.
    pub pong_wait: Duration,
    /// Deadline for each individual write.
    pub write_wait: Duration,
    /// Largest inbound data message accepted.
    pub max_message_size: usize,
}

impl PumpConfig {
    /// Interval between outbound pings: 9/10 of the pong wait.
    pub fn ping_period(&self) -> Duration {
        heartbeat::ping_period(self.pong_wait)
    }

    /// Build from socket settings.
    pub fn from_settings(settings: &SocketSettings) -> Self {
        Self {
            pong_wait: settings.pong_wait(),
            write_wait: settings.write_wait(),
            max_message_size: settings.max_message_size,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::from_settings(&SocketSettings::default())
    }
}

/// How a pump pair ended.
#[derive(Debug)]
pub(crate) enum Exit {
    /// Closed from this side.
    Shutdown,
    /// The peer went away.
    Lost(SocketError),
    /// Anything else.
    Failed(SocketError),
}

/// Launch the pump pair for `conn` over `ws`.
///
/// The returned task ends once both loops have stopped and the handler has
/// seen `on_close`.
pub fn spawn_pumps<S>(
    conn: Arc<Connection>,
    rx: mpsc::Receiver<Bytes>,
    ws: WebSocketStream<S>,
    config: PumpConfig,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let exit = run_pumps(Arc::clone(&conn), rx, ws, config).await;
        report_exit(&conn, exit);
    })
}

/// Run both loops to completion and return the more informative exit.
#[instrument(skip_all, fields(conn_id = %conn.id()))]
pub(crate) async fn run_pumps<S>(
    conn: Arc<Connection>,
    rx: mpsc::Receiver<Bytes>,
    ws: WebSocketStream<S>,
    config: PumpConfig,
) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = ws.split();

    counter!(crate::metrics::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).increment(1.0);
    debug!(ping_period = ?config.ping_period(), "pumps started");
    conn.handler().on_open(conn.id());

    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        rx,
        sink,
        config.clone(),
    ));
    let read_exit = read_loop(&conn, source, &config).await;
    let _ = conn.close();
    let write_exit = writer.await.unwrap_or_else(|e| {
        Exit::Failed(SocketError::TransportFailure {
            id: conn.id().to_owned(),
            reason: format!("write loop aborted: {e}"),
        })
    });

    counter!(crate::metrics::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(crate::metrics::WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());

    match read_exit {
        Exit::Shutdown => write_exit,
        other => other,
    }
}

/// Log the exit and deliver it to the handler. `on_close` always comes last.
pub(crate) fn report_exit(conn: &Connection, exit: Exit) {
    let handler = conn.handler();
    match exit {
        Exit::Shutdown => debug!(conn_id = %conn.id(), "connection closed locally"),
        Exit::Lost(err) => info!(conn_id = %conn.id(), error = %err, "connection lost"),
        Exit::Failed(err) => {
            warn!(conn_id = %conn.id(), error = %err, "connection failed");
            handler.on_error(conn.id(), &err);
        }
    }
    handler.on_close(conn.id());
}

async fn read_loop<S>(conn: &Connection, mut source: WsSource<S>, config: &PumpConfig) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let token = conn.shutdown_token().clone();
    let mut deadline = ReadDeadline::new(config.pong_wait);

    loop {
        let next = tokio::select! {
            () = token.cancelled() => return Exit::Shutdown,
            next = time::timeout_at(deadline.at(), source.next()) => next,
        };
        let message = match next {
            Err(_) => {
                return Exit::Failed(SocketError::TransportFailure {
                    id: conn.id().to_owned(),
                    reason: format!("no pong within {:?}", config.pong_wait),
                });
            }
            Ok(None) => {
                return Exit::Lost(SocketError::ConnectionLost {
                    id: conn.id().to_owned(),
                    reason: "stream ended".into(),
                });
            }
            Ok(Some(Err(e))) => return classify(conn.id(), e),
            Ok(Some(Ok(message))) => message,
        };

        let payload = match message {
            Message::Binary(data) => data,
            Message::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Message::Ping(_) | Message::Pong(_) => {
                deadline.extend();
                conn.mark_alive();
                continue;
            }
            Message::Close(frame) => return classify_close(conn.id(), frame),
            Message::Frame(_) => continue,
        };

        if payload.len() > config.max_message_size {
            return Exit::Failed(SocketError::TransportFailure {
                id: conn.id().to_owned(),
                reason: format!(
                    "inbound message of {} bytes exceeds the {} byte limit",
                    payload.len(),
                    config.max_message_size
                ),
            });
        }
        counter!(crate::metrics::WS_MESSAGES_RECEIVED_TOTAL).increment(1);
        conn.handler().on_read(conn.id(), payload);
    }
}

async fn write_loop<S>(
    conn: Arc<Connection>,
    mut rx: mpsc::Receiver<Bytes>,
    mut sink: WsSink<S>,
    config: PumpConfig,
) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let token = conn.shutdown_token().clone();
    let mut ticker = heartbeat::ping_interval(config.ping_period());

    let exit = loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                break send_close(&conn, &mut sink, config.write_wait).await;
            }
            next = rx.recv() => {
                let Some(payload) = next else {
                    break send_close(&conn, &mut sink, config.write_wait).await;
                };
                let Some(message) = to_message(&conn, payload) else { continue };
                if let Err(exit) = write(&mut sink, message, config.write_wait, conn.id()).await {
                    break exit;
                }
                counter!(crate::metrics::WS_MESSAGES_SENT_TOTAL).increment(1);
            }
            _ = ticker.tick() => {
                if let Err(exit) = write(&mut sink, Message::Ping(Bytes::new()), config.write_wait, conn.id()).await {
                    break exit;
                }
                counter!(crate::metrics::WS_PINGS_SENT_TOTAL).increment(1);
            }
        }
    };

    // A sink that just failed a write gets no second deadline.
    if matches!(exit, Exit::Shutdown) {
        let _ = time::timeout(config.write_wait, sink.close()).await;
    }
    let _ = conn.close();
    exit
}

fn to_message(conn: &Connection, payload: Bytes) -> Option<Message> {
    match conn.kind() {
        MessageKind::Binary => Some(Message::Binary(payload)),
        MessageKind::Text => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Some(Message::text(text)),
            Err(e) => {
                warn!(conn_id = %conn.id(), error = %e, "dropping non-UTF-8 payload on text connection");
                None
            }
        },
    }
}

async fn send_close<S>(conn: &Connection, sink: &mut WsSink<S>, wait: Duration) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: conn.close_reason().unwrap_or_default().into(),
    };
    if let Err(exit) = write(sink, Message::Close(Some(frame)), wait, conn.id()).await {
        debug!(conn_id = %conn.id(), ?exit, "close frame not delivered");
    }
    Exit::Shutdown
}

async fn write<S>(
    sink: &mut WsSink<S>,
    message: Message,
    wait: Duration,
    id: &str,
) -> Result<(), Exit>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(classify(id, e)),
        Err(_) => Err(Exit::Failed(SocketError::TransportFailure {
            id: id.to_owned(),
            reason: format!("write not completed within {wait:?}"),
        })),
    }
}

fn classify(id: &str, err: WsError) -> Exit {
    let lost = match &err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    };
    if lost {
        Exit::Lost(SocketError::ConnectionLost {
            id: id.to_owned(),
            reason: err.to_string(),
        })
    } else {
        Exit::Failed(SocketError::TransportFailure {
            id: id.to_owned(),
            reason: err.to_string(),
        })
    }
}

fn classify_close(id: &str, frame: Option<CloseFrame>) -> Exit {
    let Some(frame) = frame else {
        return Exit::Lost(SocketError::ConnectionLost {
            id: id.to_owned(),
            reason: "peer closed without a code".into(),
        });
    };
    let reason = format!("peer closed with {}: {}", u16::from(frame.code), frame.reason.as_str());
    match frame.code {
        CloseCode::Normal | CloseCode::Away | CloseCode::Abnormal => {
            Exit::Lost(SocketError::ConnectionLost {
                id: id.to_owned(),
                reason,
            })
        }
        _ => Exit::Failed(SocketError::TransportFailure {
            id: id.to_owned(),
            reason,
        }),
    }
}
