// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam for the tunnel.
//!
//! Production dials the gateway over a WebSocket (`wss://` for TLS, `ws://`
//! in test mode) and performs the auth handshake before handing the
//! connection to the state machine. Tests substitute scripted transports.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::frame::{Frame, TunnelError};

/// An authenticated tunnel connection.
#[async_trait]
pub trait TunnelConn: Send {
    /// Next inbound frame; `None` when the gateway closed cleanly.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TunnelError>;
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TunnelError>;
}

/// Dials and authenticates tunnel connections.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    async fn connect(&self, url: &str, api_key: &str) -> Result<Box<dyn TunnelConn>, TunnelError>;
}

/// WebSocket transport against the real gateway.
#[derive(Default)]
pub struct WsTransport;

struct WsConn {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TunnelTransport for WsTransport {
    async fn connect(&self, url: &str, api_key: &str) -> Result<Box<dyn TunnelConn>, TunnelError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))?;
        let mut conn = WsConn { ws };

        conn.send_frame(Frame::Auth {
            api_key: api_key.to_string(),
        })
        .await?;

        match conn.next_frame().await? {
            Some(Frame::AuthOk) => Ok(Box::new(conn)),
            Some(Frame::AuthError { code }) => Err(code.into()),
            Some(other) => Err(TunnelError::InvalidFrame(format!(
                "expected auth response, got {other:?}"
            ))),
            None => Err(TunnelError::Transport(
                "gateway closed during auth".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TunnelConn for WsConn {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TunnelError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TunnelError::Transport(e.to_string())),
                Some(Ok(Message::Binary(raw))) => return Frame::decode(&raw).map(Some),
                Some(Ok(Message::Text(raw))) => return Frame::decode(raw.as_bytes()).map(Some),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/pong are handled by tungstenite itself.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), TunnelError> {
        let raw = frame.encode()?;
        self.ws
            .send(Message::Binary(raw.into()))
            .await
            .map_err(|e| TunnelError::Transport(e.to_string()))
    }
}
