//! Transport to the device
//!
//! The session does not talk to a socket directly. A [`Connector`] opens a
//! [`TransportHandle`]: an outbound sender and an inbound receiver of
//! [`WireMessage`]s. The inbound side ending means the transport closed.
//! Dropping the handle closes the transport.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;

/// A frame on the device channel
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

/// Live connection to the device
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<WireMessage>,
}

impl TransportHandle {
    pub fn send(&self, message: WireMessage) -> Result<(), SessionError> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::TransportClosed)
    }
}

/// Opens transports. Called once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<TransportHandle, SessionError>>;
}

/// WebSocket connection to SDRconnect
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'static, Result<TransportHandle, SessionError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

            let (mut sink, mut source) = stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<WireMessage>();

            // Device -> session
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let forwarded = match message {
                        Ok(Message::Text(text)) => WireMessage::Text(text),
                        Ok(Message::Binary(data)) => WireMessage::Binary(Bytes::from(data)),
                        Ok(Message::Close(frame)) => {
                            tracing::debug!("Device closed the connection: {:?}", frame);
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::debug!("WebSocket read error: {}", e);
                            break;
                        }
                    };
                    if in_tx.send(forwarded).is_err() {
                        break;
                    }
                }
            });

            // Session -> device, until the handle is dropped
            tokio::spawn(async move {
                while let Some(message) = out_rx.recv().await {
                    let message = match message {
                        WireMessage::Text(text) => Message::Text(text),
                        WireMessage::Binary(data) => Message::Binary(data.to_vec()),
                    };
                    if let Err(e) = sink.send(message).await {
                        tracing::debug!("WebSocket write error: {}", e);
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            Ok(TransportHandle {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}
