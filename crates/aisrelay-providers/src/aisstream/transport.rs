//! Feed transport.
//!
//! The stream client talks to the feed through [`FeedConnector`] and
//! [`FeedStream`] so tests can script a feed without a network.
//! [`WsFeedConnector`] is the production implementation over
//! tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

/// Opens feed connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedStream>, FeedError>;
}

/// An open feed connection.
#[async_trait]
pub trait FeedStream: Send {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError>;

    /// Next data frame. `None` once the peer has closed the connection.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, FeedError>>;

    async fn close(&mut self);
}

/// Connects to the feed over WebSocket (TLS for `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsFeedConnector;

#[async_trait]
impl FeedConnector for WsFeedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedStream>, FeedError> {
        info!(url = %url, "Connecting to feed");
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        debug!(status = %response.status(), "Feed handshake complete");
        Ok(Box::new(WsFeedStream { ws }))
    }
}

struct WsFeedStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedStream for WsFeedStream {
    async fn send_text(&mut self, text: String) -> Result<(), FeedError> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| FeedError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, FeedError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Ping(data)) => {
                    trace!("Feed ping");
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(FeedError::Send(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Feed sent close frame");
                    return None;
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(FeedError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Error closing feed connection");
        }
    }
}
