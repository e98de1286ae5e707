//! Chat platform plugin system.
//!
//! A platform (Discord, or the offline simulation) implements [`ChatPlatform`]:
//! it delivers text to an [`Address`](hermes_protocol::Address) and pushes
//! incoming messages into an event channel owned by the gateway.

pub mod plugin;
pub mod simulated;

pub use {
    plugin::{ChatPlatform, Destination, PlatformError, PlatformEvent, PlatformStatus},
    simulated::SimulatedPlatform,
};
