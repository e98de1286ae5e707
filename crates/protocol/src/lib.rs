//! Wire protocol shared by the gateway and the chat platform adapters.
//!
//! Clients speak JSON text frames over a WebSocket. Every frame carries a
//! `type` discriminator; see [`ClientFrame`] and [`ServerFrame`].

pub mod address;
pub mod frames;

pub use {
    address::Address,
    frames::{
        ClientFrame, FrameError, Registration, ServerFrame, TextFrame, parse_client_frame,
        parse_client_frame_bytes,
    },
};

/// Announcement posted when a client registers without ever having supplied one.
pub const DEFAULT_CONNECTED_MSG: &str = "Connected";

/// Announcement posted when a client goes away without having supplied one.
pub const DEFAULT_DISCONNECTED_MSG: &str = "Disconnected";

/// Interval between synthetic messages emitted by the simulated platform.
pub const SIMULATED_TICK_INTERVAL_MS: u64 = 5_000;

/// Upper bound for a single outbound send (platform or client).
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Frames buffered per client before sends start waiting.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;
