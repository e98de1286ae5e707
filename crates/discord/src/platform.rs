use std::sync::Arc;

use {
    anyhow::Context as _,
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    serenity::{
        cache::Cache,
        client::Client,
        http::Http,
        model::{
            channel::ChannelType,
            gateway::GatewayIntents,
            id::{ChannelId, GuildId},
        },
    },
    tokio::sync::{RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    hermes_channels::{ChatPlatform, PlatformError, PlatformEvent, PlatformStatus},
    hermes_protocol::Address,
};

use crate::handler::Handler;

/// Handles needed to talk to Discord while the client is running.
#[derive(Clone)]
struct Session {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

/// Bot connection to Discord.
pub struct DiscordPlatform {
    token: SecretString,
    session: RwLock<Option<Session>>,
    ready_user: Arc<RwLock<Option<String>>>,
}

impl DiscordPlatform {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            session: RwLock::new(None),
            ready_user: Arc::new(RwLock::new(None)),
        }
    }

    /// Gateway intents: guild structure for address resolution, guild
    /// messages and their content for forwarding.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }
}

/// Plain text channels and announcement channels both take posts.
fn accepts_text(kind: ChannelType) -> bool {
    matches!(kind, ChannelType::Text | ChannelType::News)
}

/// Find the text channel an address points at, using only cached guild data.
fn resolve_text_channel(cache: &Cache, address: Address) -> Result<ChannelId, PlatformError> {
    // Discord ids are never zero, and the id constructors reject it.
    if address.community == 0 {
        return Err(PlatformError::CommunityNotFound(address.community));
    }
    let guild = cache
        .guild(GuildId::new(address.community))
        .ok_or(PlatformError::CommunityNotFound(address.community))?;

    if address.channel == 0 {
        return Err(PlatformError::ChannelNotFound(address.channel));
    }
    let channel = guild
        .channels
        .get(&ChannelId::new(address.channel))
        .ok_or(PlatformError::ChannelNotFound(address.channel))?;

    if !accepts_text(channel.kind) {
        return Err(PlatformError::NotTextChannel(address.channel));
    }
    Ok(channel.id)
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn id(&self) -> &str {
        "discord"
    }

    async fn run(
        &self,
        events: mpsc::Sender<PlatformEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let handler = Handler::new(events, Arc::clone(&self.ready_user));
        let mut client = Client::builder(self.token.expose_secret(), Self::intents())
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;

        *self.session.write().await = Some(Session {
            http: Arc::clone(&client.http),
            cache: Arc::clone(&client.cache),
        });

        let shard_manager = Arc::clone(&client.shard_manager);
        let result = tokio::select! {
            res = client.start() => res.context("discord gateway connection ended"),
            _ = cancel.cancelled() => {
                info!("discord: shutting down shards");
                shard_manager.shutdown_all().await;
                Ok(())
            },
        };

        self.session.write().await.take();
        self.ready_user.write().await.take();
        result
    }

    async fn send(&self, address: Address, text: &str) -> Result<(), PlatformError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(PlatformError::NotConnected)?;

        let channel_id = resolve_text_channel(&session.cache, address)?;
        channel_id
            .say(session.http.as_ref(), text)
            .await
            .map_err(|e| PlatformError::Delivery(e.to_string()))?;
        Ok(())
    }

    async fn status(&self) -> PlatformStatus {
        let user = self.ready_user.read().await.clone();
        PlatformStatus {
            kind: self.id().into(),
            connected: user.is_some(),
            user,
        }
    }
}
