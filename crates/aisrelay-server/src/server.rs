//! WebSocket endpoint for position-update subscribers.
//!
//! This module accepts subscriber connections and handles:
//! - Path check during the handshake (404 for anything but the positions path)
//! - Registration and topic subscription
//! - Draining inbound frames, answering pings
//! - Removal from the registry on close or error
//! - Closing the socket when the registry drops the subscriber

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::registry::{SinkError, SubscriberRegistry, SubscriberSink, Topic};

/// Path subscribers connect to.
pub const POSITIONS_PATH: &str = "/ws/vessels/positions";

/// Configuration for the subscriber endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
        }
    }
}

/// The subscriber WebSocket server.
pub struct SubscriberServer {
    config: ServerConfig,
    registry: Arc<SubscriberRegistry>,
}

impl SubscriberServer {
    pub fn new(config: ServerConfig, registry: Arc<SubscriberRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Bind and accept connections until the task is dropped.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            path = POSITIONS_PATH,
            "Subscriber endpoint listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, registry).await {
                            debug!(%addr, error = %e, "Subscriber connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Time allowed for the closing handshake of a dropped subscriber.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound half of an accepted subscriber socket.
struct WsSubscriber {
    sink: Mutex<WsSink>,
    dropped: Notify,
}

impl WsSubscriber {
    /// Best-effort close frame. Skipped if a stuck send still holds the sink.
    async fn send_close(&self) {
        if let Ok(mut sink) = self.sink.try_lock() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }
}

#[async_trait]
impl SubscriberSink for WsSubscriber {
    async fn send_text(&self, text: String) -> Result<(), SinkError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    SinkError::Closed
                }
                other => SinkError::Send(other.to_string()),
            })
    }

    async fn close(&self) {
        self.dropped.notify_one();
    }
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("no endpoint at {path}")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Handle a single subscriber connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
) -> Result<(), tungstenite::Error> {
    let ws_stream =
        tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
            let path = req.uri().path();
            if path == POSITIONS_PATH {
                Ok(resp)
            } else {
                warn!(%addr, path, "Rejected subscriber on unknown path");
                Err(not_found(path))
            }
        })
        .await?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let subscriber = Arc::new(WsSubscriber {
        sink: Mutex::new(ws_tx),
        dropped: Notify::new(),
    });

    let id = registry.connect(subscriber.clone()).await;
    registry.subscribe(id, Topic::PositionUpdates).await;
    debug!(%addr, connection = %id, "Subscriber registered");

    let result = loop {
        let frame = tokio::select! {
            _ = subscriber.dropped.notified() => {
                debug!(%addr, connection = %id, "Closing dropped subscriber");
                subscriber.send_close().await;
                break Ok(());
            }
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = subscriber.sink.lock().await.send(Message::Pong(data)).await {
                    break Err(e);
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(%addr, connection = %id, "Subscriber closed connection");
                break Ok(());
            }
            Some(Ok(_)) => {} // Inbound payloads are ignored
            Some(Err(e)) => break Err(e),
        }
    };

    registry.disconnect(id).await;
    result
}
