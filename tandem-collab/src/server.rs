//! WebSocket gateway.
//!
//! ```text
//!             ┌─────────── one connection ───────────┐
//! socket ──►  │ read loop ──decode──► Session ──► Pad / Registry
//!             │                          │ deliver()      │ offer()
//!             │                          ▼                ▼
//! socket ◄──  │ WsSink ◄── Delivery ◄──────── mailbox ◄───┘
//!             └──────────────────────────────────────┘
//! ```
//!
//! The gateway only moves frames; all behavior lives in [`Session`] and
//! [`Delivery`].

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::client::RemoteInfo;
use crate::config::ServerConfig;
use crate::delivery::{Delivery, OutboundSink};
use crate::protocol::{decode_batch, encode_batch, ClientMessage, ProtocolError, ServerMessage};
use crate::registry::Registry;
use crate::session::Session;
use crate::storage::{Storage, StoreError};

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The collaboration server.
pub struct CollabServer {
    registry: Arc<Registry>,
}

impl CollabServer {
    /// Load users and pads from `storage`.
    pub async fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> Result<Self, GatewayError> {
        let registry = Registry::open(config, storage).await?;
        Ok(Self { registry })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.registry.config().bind_addr).await?;
        log::info!("Tandem server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry).await {
                    log::warn!("Connection from {addr} ended with error: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
) -> Result<(), GatewayError> {
    let trust_forwarded_for = registry.config().trust_forwarded_for;
    let mut user_agent = String::new();
    let mut forwarded_for = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request.headers();
        if let Some(agent) = headers.get("user-agent").and_then(|v| v.to_str().ok()) {
            user_agent = agent.to_string();
        }
        forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string());
        Ok(response)
    };
    // Oversized frames fail inside tungstenite before they are buffered.
    let limit = Some(registry.config().max_message_size);
    let ws_config = WebSocketConfig::default()
        .max_message_size(limit)
        .max_frame_size(limit);
    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;

    let ip = match forwarded_for {
        Some(ip) if trust_forwarded_for => ip,
        _ => addr.ip().to_string(),
    };
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (mut session, mailbox) = Session::connect(registry.clone(), RemoteInfo::new(ip, user_agent)).await;

    let heartbeat = registry.config().heartbeat_interval;
    let client = session.id();
    let delivery = tokio::spawn(async move {
        let sink = WsSink { sender: ws_sender };
        if let Err(e) = Delivery::new(registry).run(mailbox, sink, heartbeat).await {
            log::debug!("Delivery to client {client} stopped: {e}");
        }
    });

    let mut result = Ok(());
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Binary(data)) => match decode_batch::<ClientMessage>(&data) {
                Ok(batch) => session.handle_batch(batch).await,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                result = Err(e.into());
                break;
            }
        }
    }

    session.close().await;
    let _ = delivery.await;
    result
}

/// Writes batches to the WebSocket as binary frames.
struct WsSink {
    sender: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl OutboundSink for WsSink {
    async fn send_batch(&mut self, batch: Vec<ServerMessage>) -> Result<(), ProtocolError> {
        let bytes = encode_batch(&batch)?;
        self.sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }

    async fn heartbeat(&mut self) -> Result<(), ProtocolError> {
        self.sender
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }
}
