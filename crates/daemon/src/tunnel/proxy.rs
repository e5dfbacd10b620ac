// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridging tunneled work onto the local HTTP server.
//!
//! Proxied requests go through reqwest against localhost; CONNECT streams
//! become raw TCP so the gateway can reach WebSocket endpoints. Responses
//! lose their hop-by-hop headers before re-entering the tunnel. Every
//! proxied request carries the tunnel-origin marker header, which is how
//! the local server knows to refuse `/api/tunnel/*`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::frame::Frame;

/// Header marking a request as having arrived through the tunnel.
pub const TUNNEL_ORIGIN_HEADER: &str = "x-tower-tunnel";

/// Headers that never cross the proxy boundary.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

pub fn strip_hop_by_hop(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .collect()
}

/// Proxy one tunneled HTTP request to the local server and emit the
/// response frame. Never fails outward: proxy errors become 502 frames.
pub async fn proxy_request(
    client: &reqwest::Client,
    local_port: u16,
    stream: u64,
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    out_tx: mpsc::Sender<Frame>,
) {
    let frame = match forward(client, local_port, &method, &path, headers, body).await {
        Ok((status, headers, body)) => Frame::Response {
            stream,
            status,
            headers,
            body,
        },
        Err(message) => {
            debug!(stream, error = %message, "tunnel proxy request failed");
            Frame::Response {
                stream,
                status: 502,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: Some(
                    BASE64.encode(
                        serde_json::json!({ "error": message })
                            .to_string()
                            .as_bytes(),
                    ),
                ),
            }
        }
    };
    let _ = out_tx.send(frame).await;
}

#[allow(clippy::type_complexity)]
async fn forward(
    client: &reqwest::Client,
    local_port: u16,
    method: &str,
    path: &str,
    headers: Vec<(String, String)>,
    body: Option<String>,
) -> Result<(u16, Vec<(String, String)>, Option<String>), String> {
    let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| e.to_string())?;
    let url = format!("http://127.0.0.1:{local_port}{path}");

    let mut request = client.request(method, &url);
    for (name, value) in strip_hop_by_hop(headers) {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }
    request = request.header(TUNNEL_ORIGIN_HEADER, "1");
    if let Some(encoded) = body {
        let raw = BASE64.decode(encoded.as_bytes()).map_err(|e| e.to_string())?;
        request = request.body(raw);
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let headers = strip_hop_by_hop(
        response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    );
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    let body = if bytes.is_empty() {
        None
    } else {
        Some(BASE64.encode(&bytes))
    };
    Ok((status, headers, body))
}

/// One open CONNECT bridge: data frames in, raw TCP out (and back).
pub struct ConnectBridge {
    data_tx: mpsc::Sender<Vec<u8>>,
}

impl ConnectBridge {
    /// Open a TCP connection to the local server and pump both directions
    /// until either side closes.
    pub async fn open(
        local_port: u16,
        stream: u64,
        out_tx: mpsc::Sender<Frame>,
    ) -> Result<Self, String> {
        let tcp = TcpStream::connect(("127.0.0.1", local_port))
            .await
            .map_err(|e| e.to_string())?;
        let (mut tcp_read, mut tcp_write) = tcp.into_split();
        let (data_tx, mut data_rx) = mpsc::channel::<Vec<u8>>(64);

        // Tunnel → TCP
        tokio::spawn(async move {
            while let Some(chunk) = data_rx.recv().await {
                if tcp_write.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            let _ = tcp_write.shutdown().await;
        });

        // TCP → tunnel
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match tcp_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = Frame::ConnectData {
                            stream,
                            data: BASE64.encode(&buf[..n]),
                        };
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = out_tx.send(Frame::ConnectClose { stream }).await;
        });

        Ok(Self { data_tx })
    }

    /// Feed one tunneled data frame into the bridge.
    pub async fn data(&self, encoded: &str) {
        if let Ok(raw) = BASE64.decode(encoded.as_bytes()) {
            let _ = self.data_tx.send(raw).await;
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
