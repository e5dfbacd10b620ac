// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket PTY attach.
//!
//! `/ws/terminal/{id}` upgrades to a binary socket. Outbound messages are
//! prefixed with a one-byte tag (0x01 = data). Inbound messages carry
//! symmetric tags: 0x01 data, 0x02 resize (cols/rows as two u16 BE),
//! 0x03 start composing, 0x04 stop composing.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::response::IntoResponse;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::sync::broadcast;
use tracing::debug;

use af_core::SessionId;

use crate::lifecycle;
use crate::pty::PtySession;

use super::ApiError;

/// Outbound frame tag for PTY data.
pub const FRAME_DATA: u8 = 0x01;
/// Inbound resize tag.
pub const FRAME_RESIZE: u8 = 0x02;
/// Inbound composing-start tag.
pub const FRAME_COMPOSING_START: u8 = 0x03;
/// Inbound composing-stop tag.
pub const FRAME_COMPOSING_STOP: u8 = 0x04;

pub async fn attach_terminal(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deps =
        lifecycle::deps().ok_or_else(|| ApiError::Unavailable("still starting up".to_string()))?;
    let session = deps
        .supervisor
        .get(&SessionId::new(&id))
        .ok_or_else(|| ApiError::NotFound(format!("unknown terminal: {id}")))?;

    Ok(ws.on_upgrade(move |socket| pump(socket, session)))
}

async fn pump(socket: WebSocket, session: Arc<PtySession>) {
    let (mut sink, mut stream) = socket.split();
    let mut output = session.subscribe();

    loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Ok(bytes) => {
                    let mut framed = Vec::with_capacity(bytes.len() + 1);
                    framed.push(FRAME_DATA);
                    framed.extend_from_slice(&bytes);
                    if sink.send(Message::Binary(framed.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(session = %session.id(), skipped, "WS consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Binary(raw) => {
                        if handle_frame(&session, &raw).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Text frames and pings are not part of the protocol.
                    _ => {}
                }
            }
        }
        if session.is_dead() {
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn handle_frame(session: &Arc<PtySession>, raw: &[u8]) -> Result<(), ()> {
    let Some((&tag, payload)) = raw.split_first() else {
        return Ok(());
    };
    match tag {
        FRAME_DATA => session
            .write(payload.to_vec(), true)
            .await
            .map_err(|_| ()),
        FRAME_RESIZE => {
            if payload.len() != 4 {
                return Ok(());
            }
            let cols = u16::from_be_bytes([payload[0], payload[1]]);
            let rows = u16::from_be_bytes([payload[2], payload[3]]);
            session.resize(cols, rows).map_err(|_| ())
        }
        FRAME_COMPOSING_START => {
            session.start_composing();
            Ok(())
        }
        FRAME_COMPOSING_STOP => {
            session.stop_composing();
            Ok(())
        }
        _ => {
            debug!(session = %session.id(), tag, "unknown WS frame tag");
            Ok(())
        }
    }
}
