//! Discord implementation of [`ChatPlatform`](hermes_channels::ChatPlatform).
//!
//! A guild is a community and a guild text channel is a channel, so an
//! [`Address`](hermes_protocol::Address) is `(guild id, channel id)`.

mod handler;
pub mod platform;

pub use platform::DiscordPlatform;
