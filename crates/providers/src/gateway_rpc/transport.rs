//! Duplex connection abstraction for the agent gateway.
//!
//! The client only needs to send text frames, receive text frames and
//! closes, and close with a code. [`WebSocketTransport`] provides that over
//! `tokio-tungstenite`; tests supply scripted connections.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shimeji_core::ProviderError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};

/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What the connection produced next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Text(String),
    /// Closed by the peer, with the close code it sent.
    Closed { code: u16 },
    /// Socket-level failure; the connection is unusable afterwards.
    Error(String),
}

/// One open duplex connection.
#[async_trait]
pub trait GatewayConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ProviderError>;

    /// Wait for the next inbound event. Must be cancel-safe.
    async fn next_event(&mut self) -> ConnectionEvent;

    /// Close with `code`; failures are ignored.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Opens connections to a gateway URL.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayConnection>, ProviderError>;
}

/// Production transport over WebSocket.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct WebSocketConnection {
    ws: WsStream,
    closed: bool,
}

#[async_trait]
impl GatewayTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayConnection>, ProviderError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            debug!(endpoint = %url, error = %e, "WebSocket connect failed");
            ProviderError::Connection {
                endpoint: url.to_string(),
            }
        })?;
        Ok(Box::new(WebSocketConnection { ws, closed: false }))
    }
}

#[async_trait]
impl GatewayConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), ProviderError> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ProviderError::StreamInterrupted(e.to_string()))
    }

    async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return ConnectionEvent::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    let code = frame.map_or(ABNORMAL_CLOSURE, |f| u16::from(f.code));
                    return ConnectionEvent::Closed { code };
                }
                Some(Ok(other)) => {
                    trace!(kind = ?other, "Ignoring non-text WebSocket frame");
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return ConnectionEvent::Error(e.to_string());
                }
                None => {
                    self.closed = true;
                    return ConnectionEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            trace!(error = %e, "WebSocket close failed");
        }
    }
}
