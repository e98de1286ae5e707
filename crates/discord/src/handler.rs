use std::sync::Arc;

use {
    async_trait::async_trait,
    serenity::{
        cache::Cache,
        client::{Context, EventHandler},
        model::{channel::Message, gateway::Ready},
    },
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, trace},
};

use {hermes_channels::PlatformEvent, hermes_protocol::Address};

/// Forwards guild messages into the gateway's event channel.
pub(crate) struct Handler {
    events: mpsc::Sender<PlatformEvent>,
    ready_user: Arc<RwLock<Option<String>>>,
}

impl Handler {
    pub(crate) fn new(
        events: mpsc::Sender<PlatformEvent>,
        ready_user: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self { events, ready_user }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "discord: ready");
        *self.ready_user.write().await = Some(ready.user.name.clone());
    }

    // The bot's own posts are forwarded too: that echo is how web clients
    // see their messages appear in the channel.
    async fn message(&self, ctx: Context, msg: Message) {
        let Some(event) = to_platform_event(&ctx.cache, &msg) else {
            trace!(channel_id = %msg.channel_id, "discord: ignoring message outside a guild");
            return;
        };
        if self.events.send(event).await.is_err() {
            debug!("discord: event receiver closed, dropping message");
        }
    }
}

fn to_platform_event(cache: &Cache, msg: &Message) -> Option<PlatformEvent> {
    let guild_id = msg.guild_id?;

    let channel_name = cache
        .guild(guild_id)
        .and_then(|guild| guild.channels.get(&msg.channel_id).map(|c| c.name.clone()))
        .unwrap_or_else(|| msg.channel_id.to_string());

    // Guild nickname first, like the member list shows it.
    let author = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| msg.author.display_name().to_string());

    Some(PlatformEvent::at(
        Address::new(guild_id.get(), msg.channel_id.get()),
        author,
        channel_name,
        msg.content.clone(),
    ))
}
