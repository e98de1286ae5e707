//! Transport-agnostic driver for one client connection.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use hermes_protocol::{ClientFrame, FrameError};

use crate::{
    connection::Connection,
    routing::{RoutingEngine, RoutingError},
};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close frame.
    Closed,
    /// The stream ended without a close handshake.
    Abrupt,
    /// The transport failed.
    Error(String),
    /// The gateway is shutting down.
    Shutdown,
}

/// What the inbound half of a transport produced next.
#[derive(Debug)]
pub enum Inbound {
    Frame(ClientFrame),
    Malformed(FrameError),
    Disconnected(DisconnectReason),
}

/// Inbound half of a client transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next inbound item. Must be cancel-safe.
    async fn next_inbound(&mut self) -> Inbound;
}

/// Drive a connection from accept to termination.
///
/// Frames are handled one at a time in arrival order. Cleanup runs on every
/// exit path, including shutdown.
pub async fn run_connection(
    engine: Arc<RoutingEngine>,
    conn: Arc<Connection>,
    mut source: impl FrameSource,
    cancel: CancellationToken,
) {
    let conn_id = conn.id();
    if let Err(e) = engine.accept(Arc::clone(&conn)).await {
        warn!(%conn_id, error = %e, "refusing connection");
        return;
    }

    let reason = loop {
        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => break DisconnectReason::Shutdown,
            inbound = source.next_inbound() => inbound,
        };
        match inbound {
            Inbound::Frame(frame) => match engine.handle_frame(&conn, frame).await {
                Ok(()) => {},
                Err(RoutingError::Malformed(e)) => {
                    warn!(%conn_id, error = %e, "dropping frame, registration incomplete");
                },
                Err(RoutingError::Terminated) => break DisconnectReason::Shutdown,
                Err(e) => debug!(%conn_id, error = %e, "frame not handled"),
            },
            Inbound::Malformed(e) => warn!(%conn_id, error = %e, "dropping malformed frame"),
            Inbound::Disconnected(reason) => break reason,
        }
    };

    engine.disconnect(&conn, reason).await;
}
