//! Gateway: WebSocket/HTTP server bridging web clients to a chat platform.
//!
//! Lifecycle:
//! 1. Build the chat platform from config
//! 2. Bind the listener and serve `/`, `/health`, `/demo`, `/status`, `/ws`
//! 3. Run the platform connection and fan its messages out to clients
//! 4. On shutdown, drain connections (posting their disconnect
//!    announcements) before the platform is stopped
//!
//! The registration state machine and fan-out live in [`routing`]; the
//! transports only translate between sockets and frames.

pub mod auth;
pub mod connection;
pub mod registry;
pub mod routing;
pub mod server;
pub mod state;
pub mod transport;
pub mod ws;

pub use {
    connection::{Connection, ConnectionId, ConnectionState, FrameSink, PeerInfo, SinkError},
    registry::{ConnectionRegistry, RegistryError},
    routing::{RoutingEngine, RoutingError},
    server::{build_gateway_app, build_platform, build_state, run_gateway, start_gateway},
    state::GatewayState,
    transport::{DisconnectReason, FrameSource, Inbound, run_connection},
};
