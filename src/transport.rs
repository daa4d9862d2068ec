//! WebSocket transport to the assistant service
//!
//! One duplex, message-oriented connection carries JSON control messages as
//! text frames and raw PCM audio as binary frames. The socket is split into
//! a writer task fed by a command channel and a reader task that forwards
//! decoded inbound frames; both ends surface closure by dropping their
//! channel, which the session observes as an unexpected close.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

/// A frame queued for the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// JSON control message
    Control(ClientMessage),
    /// Raw 16-bit LE PCM audio frame
    Audio(Vec<u8>),
    /// Close the connection
    Close,
}

/// A frame delivered by the reader task
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Decoded JSON control message
    Control(ServerMessage),
    /// Raw 16-bit LE PCM playback buffer
    Audio(Vec<u8>),
}

/// Cheap cloneable handle for sending frames on an open connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl ConnectionHandle {
    /// Wrap a raw command channel (used by custom transports and test fakes)
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<OutboundCommand>) -> Self {
        Self { tx }
    }

    /// Queue a control message.
    ///
    /// # Errors
    ///
    /// Returns error if the connection has closed
    pub fn send_control(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(OutboundCommand::Control(msg))
            .map_err(|_| Error::Connection("connection closed".to_string()))
    }

    /// Queue one audio frame.
    ///
    /// # Errors
    ///
    /// Returns error if the connection has closed
    pub fn send_audio(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(OutboundCommand::Audio(frame))
            .map_err(|_| Error::Connection("connection closed".to_string()))
    }

    /// Request a graceful close. Safe to call on an already-closed connection.
    pub fn close(&self) {
        let _ = self.tx.send(OutboundCommand::Close);
    }
}

/// An established duplex connection
pub struct Connection {
    /// Outbound half
    pub handle: ConnectionHandle,
    /// Inbound half; yields `None` when the connection closes
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Connection factory, injectable so sessions can run over test fakes
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to the given websocket URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the connection fails
    async fn connect(&self, url: &str) -> Result<Connection>;
}

/// Connector backed by a real websocket
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Connection(format!("invalid server url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::Connection(format!(
                "server url must be ws:// or wss://, got {url}"
            )));
        }

        let (ws_stream, _) = connect_async(url).await?;
        tracing::info!(%url, "connected to assistant service");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<OutboundCommand>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<InboundFrame>();

        // Writer: drains the command channel onto the socket
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let result = match cmd {
                    OutboundCommand::Control(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => ws_sink.send(Message::Text(json)).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode control message");
                            continue;
                        }
                    },
                    OutboundCommand::Audio(frame) => ws_sink.send(Message::Binary(frame)).await,
                    OutboundCommand::Close => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            tracing::debug!("websocket writer task finished");
        });

        // Reader: decodes socket frames into the inbound channel; dropping
        // frame_tx is how closure reaches the session
        tokio::spawn(async move {
            while let Some(msg) = ws_source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Some(parsed) = parse_control_frame(&text) else {
                            continue;
                        };
                        if frame_tx.send(InboundFrame::Control(parsed)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        if frame_tx.send(InboundFrame::Audio(data)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by server");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket receive failed");
                        break;
                    }
                }
            }
            tracing::debug!("websocket reader task finished");
        });

        Ok(Connection {
            handle: ConnectionHandle::new(cmd_tx),
            inbound: frame_rx,
        })
    }
}

/// Parse one inbound text frame.
///
/// One malformed message must not terminate the session: parse failures are
/// logged and the frame is discarded.
fn parse_control_frame(text: &str) -> Option<ServerMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(error = %e, frame = text, "discarding malformed control message");
            None
        }
    }
}
