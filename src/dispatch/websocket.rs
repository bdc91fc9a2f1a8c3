//! Websocket transport over `tokio-tungstenite`.

use super::{Connection, Transport};
use crate::error::DispatchError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to a fixed websocket URI.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    uri: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound the TCP connect plus the opening handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(&self) -> Result<WebSocketConnection, DispatchError> {
        let connect_error = |reason: String| DispatchError::Connect {
            uri: self.uri.clone(),
            reason,
        };
        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.uri.as_str()))
                .await
                .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
                .map_err(|e| connect_error(e.to_string()))?;
        info!("Connected to {}", self.uri);
        debug!("Handshake status: {}", response.status());
        Ok(WebSocketConnection { stream })
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}

impl Connection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), DispatchError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| DispatchError::Send(e.to_string()))
    }

    async fn closed(&mut self) {
        // inbound messages are not part of the protocol and are discarded
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Close(frame)) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    return;
                }
                Ok(other) => debug!("Ignoring inbound message: {:?}", other),
                Err(e) => {
                    debug!("Websocket read failed: {}", e);
                    return;
                }
            }
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing websocket: {}", e);
        }
    }
}
