//! WebSocket transport: splits an upgraded socket into a [`FrameSource`] and
//! a queue-backed [`FrameSink`] drained by a single writer task.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    axum::{
        extract::ws::{Message, WebSocket},
        http::HeaderMap,
    },
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::sync::mpsc::{self, error::SendTimeoutError},
    tracing::{debug, trace, warn},
};

use hermes_protocol::{ServerFrame, parse_client_frame, parse_client_frame_bytes};

use crate::{
    connection::{Connection, ConnectionId, FrameSink, PeerInfo, SinkError},
    state::GatewayState,
    transport::{DisconnectReason, FrameSource, Inbound, run_connection},
};

/// Headers that carry credentials and never show up in status output.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Enqueues frames for the connection's writer task.
pub struct QueueSink {
    tx: mpsc::Sender<ServerFrame>,
    timeout: Duration,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<ServerFrame>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }
}

#[async_trait]
impl FrameSink for QueueSink {
    async fn send_frame(&self, frame: ServerFrame) -> Result<(), SinkError> {
        self.tx
            .send_timeout(frame, self.timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SinkError::Timeout,
                SendTimeoutError::Closed(_) => SinkError::Closed,
            })
    }
}

/// Sole writer for one socket. Ends when every sender is gone or a write
/// fails, then closes the socket.
async fn write_loop(
    conn_id: ConnectionId,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerFrame>,
    timeout: Duration,
) {
    while let Some(frame) = rx.recv().await {
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(%conn_id, error = %e, "failed to serialize frame");
                continue;
            },
        };
        match tokio::time::timeout(timeout, ws_tx.send(Message::Text(json.into()))).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                debug!(%conn_id, error = %e, "socket write failed");
                break;
            },
            Err(_) => {
                warn!(%conn_id, "socket write timed out");
                break;
            },
        }
    }
    let _ = ws_tx.close().await;
    trace!(%conn_id, "writer finished");
}

// ── Inbound ──────────────────────────────────────────────────────────────────

pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_inbound(&mut self) -> Inbound {
        loop {
            let parsed = match self.stream.next().await {
                None => return Inbound::Disconnected(DisconnectReason::Abrupt),
                Some(Err(e)) => return Inbound::Disconnected(DisconnectReason::Error(e.to_string())),
                Some(Ok(Message::Close(_))) => return Inbound::Disconnected(DisconnectReason::Closed),
                Some(Ok(Message::Text(text))) => parse_client_frame(text.as_str()),
                Some(Ok(Message::Binary(data))) => parse_client_frame_bytes(&data),
                // Protocol-level keepalive is answered by axum.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            };
            return match parsed {
                Ok(frame) => Inbound::Frame(frame),
                Err(e) => Inbound::Malformed(e),
            };
        }
    }
}

// ── Connection setup ─────────────────────────────────────────────────────────

/// Describe the peer for status reporting, hiding credential headers.
pub fn peer_info(addr: SocketAddr, headers: &HeaderMap) -> PeerInfo {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "<redacted>".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect::<BTreeMap<_, _>>();
    PeerInfo {
        host: Some(addr.ip().to_string()),
        port: Some(addr.port()),
        headers,
    }
}

/// Serve one upgraded socket until it ends or the gateway shuts down.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, peer: PeerInfo) {
    let timeout = state.limits.send_timeout();
    let (tx, rx) = mpsc::channel(state.limits.outbound_queue);
    let conn = Arc::new(Connection::new(QueueSink::new(tx, timeout), peer));
    let conn_id = conn.id();

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(conn_id, ws_tx, rx, timeout));

    run_connection(
        Arc::clone(&state.engine),
        conn,
        WsSource { stream: ws_rx },
        state.cancel.clone(),
    )
    .await;

    // The registry no longer holds the connection, so dropping the last handle
    // closes the queue and lets the writer flush and close the socket.
    if let Err(e) = writer.await {
        debug!(%conn_id, error = %e, "writer task failed");
    }
}
