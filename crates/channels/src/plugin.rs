use {
    async_trait::async_trait, serde::Serialize, tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

use hermes_protocol::Address;

/// Core platform trait. Each chat backend implements this.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Platform identifier (e.g. "discord").
    fn id(&self) -> &str;

    /// Connect and push incoming messages into `events` until `cancel` fires.
    ///
    /// Returns once the platform connection has been released.
    async fn run(
        &self,
        events: mpsc::Sender<PlatformEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;

    /// Deliver `text` verbatim to `address`. No retries, no confirmation.
    async fn send(&self, address: Address, text: &str) -> Result<(), PlatformError>;

    /// Current connection status, for status reporting.
    async fn status(&self) -> PlatformStatus;
}

/// Who an incoming platform message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Clients registered at exactly this address.
    Address(Address),
    /// Every registered client regardless of address.
    AllRegistered,
}

/// A message observed on the platform, consumed once by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEvent {
    pub destination: Destination,
    pub author: String,
    pub channel_name: String,
    pub text: String,
}

impl PlatformEvent {
    pub fn at(
        address: Address,
        author: impl Into<String>,
        channel_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            destination: Destination::Address(address),
            author: author.into(),
            channel_name: channel_name.into(),
            text: text.into(),
        }
    }
}

/// Platform health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub kind: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("community {0} not found")]
    CommunityNotFound(u64),

    #[error("channel {0} not found")]
    ChannelNotFound(u64),

    #[error("channel {0} is not a text channel")]
    NotTextChannel(u64),

    #[error("platform not connected")]
    NotConnected,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl PlatformError {
    /// Address resolution failures are expected (stale or foreign ids) and
    /// only worth a debug line.
    pub fn is_address_not_found(&self) -> bool {
        matches!(
            self,
            Self::CommunityNotFound(_) | Self::ChannelNotFound(_) | Self::NotTextChannel(_)
        )
    }
}
