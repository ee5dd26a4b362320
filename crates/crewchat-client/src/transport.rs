//! WebSocket transport for the client.
//!
//! Provides [`Transport`] which carries STOMP frames over a WebSocket, one
//! frame per WebSocket message. This is a thin layer that only moves frames;
//! protocol logic remains in the Sans-IO [`crate::ChatClient`].

use crewchat_proto::{Frame, Packet};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue, StatusCode},
    },
};

/// Buffered frames per direction.
const CHANNEL_CAPACITY: usize = 32;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// URL or header cannot form an upgrade request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server refused the upgrade with 401/403.
    #[error("unauthorized")]
    Unauthorized,

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connection task has stopped.
    #[error("transport closed")]
    Closed,

    /// Frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Events produced by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Upgrade complete
    Connected,
    /// Connection closed; no further events follow
    Disconnected {
        /// Close reason or I/O error
        reason: String,
    },
    /// A STOMP frame arrived
    FrameReceived(Frame),
    /// A bare EOL heart-beat arrived
    HeartBeat,
    /// A message could not be decoded; the connection stays up
    Error(String),
}

enum Outbound {
    Frame(Frame),
    HeartBeat,
    Close,
}

/// Handle to an open WebSocket.
///
/// Frames are sent and events received via channels; an internal task handles
/// the socket I/O.
pub struct Transport {
    outgoing: mpsc::Sender<Outbound>,
    events: mpsc::Receiver<TransportEvent>,
    abort_handle: tokio::task::AbortHandle,
}

impl Transport {
    /// Queue a frame for sending.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outgoing.send(Outbound::Frame(frame)).await.map_err(|_| TransportError::Closed)
    }

    /// Queue a heart-beat.
    pub async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.outgoing.send(Outbound::HeartBeat).await.map_err(|_| TransportError::Closed)
    }

    /// Next event. `None` once the connection task is gone and drained.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Close the WebSocket gracefully. Frames queued before are sent first.
    pub async fn disconnect(self) {
        if self.outgoing.send(Outbound::Close).await.is_err() {
            tracing::trace!("transport already closed");
        }
    }

    /// Stop the connection task immediately.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Open a WebSocket to `url` with extra upgrade `headers`.
///
/// The first event on the returned transport is [`TransportEvent::Connected`].
pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<Transport, TransportError> {
    let mut request =
        url.into_client_request().map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let ws = match connect_async(request).await {
        Ok((ws, _response)) => ws,
        Err(tungstenite::Error::Http(response))
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            return Err(TransportError::Unauthorized);
        },
        Err(e) => return Err(TransportError::Connection(e.to_string())),
    };

    tracing::debug!(url, "websocket connected");

    let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);

    events_tx.send(TransportEvent::Connected).await.map_err(|_| TransportError::Closed)?;

    let handle = tokio::spawn(run_connection(ws, outgoing_rx, events_tx));

    Ok(Transport { outgoing: outgoing_tx, events: events_rx, abort_handle: handle.abort_handle() })
}

/// Run the connection, bridging between channels and the socket.
async fn run_connection(
    ws: WsStream,
    mut outgoing: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            outbound = outgoing.recv() => {
                let message = match outbound {
                    Some(Outbound::Frame(frame)) => match encode(&frame) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(command = %frame.command, error = %e, "dropping unencodable frame");
                            continue;
                        },
                    },
                    Some(Outbound::HeartBeat) => Message::Text("\n".to_string()),
                    Some(Outbound::Close) | None => {
                        if let Err(e) = sink.send(Message::Close(None)).await {
                            tracing::debug!(error = %e, "close handshake failed");
                        }
                        break "closed by client".to_string();
                    },
                };

                if let Err(e) = sink.send(message).await {
                    break format!("send failed: {e}");
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => forward(&events, text.as_bytes()).await,
                Some(Ok(Message::Binary(data))) => forward(&events, &data).await,
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server ({}): {}", f.code, f.reason),
                    );
                },
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {},
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };

    tracing::debug!(%reason, "websocket closed");
    // Receiver gone means nobody is listening any more.
    let _ = events.send(TransportEvent::Disconnected { reason }).await;
}

fn encode(frame: &Frame) -> Result<Message, TransportError> {
    let bytes = frame.to_bytes().map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    })
}

async fn forward(events: &mpsc::Sender<TransportEvent>, bytes: &[u8]) {
    let event = match Frame::decode(bytes) {
        Ok(Packet::HeartBeat) => TransportEvent::HeartBeat,
        Ok(Packet::Frame(frame)) => {
            tracing::trace!(command = %frame.command, "frame received");
            TransportEvent::FrameReceived(frame)
        },
        Err(e) => TransportEvent::Error(e.to_string()),
    };

    if events.send(event).await.is_err() {
        tracing::trace!("transport event dropped, receiver gone");
    }
}
