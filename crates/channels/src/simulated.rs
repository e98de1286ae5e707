//! Offline platform used for demos and tests.
//!
//! Outbound sends are dropped. Every tick a timestamp message is broadcast to
//! all registered clients, so the client side of the bridge can be exercised
//! without a bot token.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    tokio::{sync::mpsc, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use hermes_protocol::{Address, SIMULATED_TICK_INTERVAL_MS};

use crate::plugin::{ChatPlatform, Destination, PlatformError, PlatformEvent, PlatformStatus};

pub const SIMULATED_AUTHOR: &str = "FakeAuthor";
pub const SIMULATED_CHANNEL: &str = "FakeChannel";
pub const SIMULATED_USER: &str = "FakeUser";

pub struct SimulatedPlatform {
    interval: Duration,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(SIMULATED_TICK_INTERVAL_MS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    fn tick_event() -> PlatformEvent {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        PlatformEvent {
            destination: Destination::AllRegistered,
            author: SIMULATED_AUTHOR.into(),
            channel_name: SIMULATED_CHANNEL.into(),
            text: format!("Time {secs}"),
        }
    }
}

#[async_trait]
impl ChatPlatform for SimulatedPlatform {
    fn id(&self) -> &str {
        "simulated"
    }

    async fn run(
        &self,
        events: mpsc::Sender<PlatformEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "simulated platform ready");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let event = Self::tick_event();
                    debug!(text = %event.text, "simulated platform tick");
                    if events.send(event).await.is_err() {
                        debug!("event receiver dropped, stopping simulated platform");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    async fn send(&self, address: Address, text: &str) -> Result<(), PlatformError> {
        debug!(%address, len = text.len(), "simulated platform: send dropped");
        Ok(())
    }

    async fn status(&self) -> PlatformStatus {
        PlatformStatus {
            kind: self.id().into(),
            connected: true,
            user: Some(SIMULATED_USER.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::time::Instant};

    #[tokio::test(start_paused = true)]
    async fn emits_broadcast_ticks_on_interval() {
        let platform = std::sync::Arc::new(SimulatedPlatform::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let runner = {
            let platform = std::sync::Arc::clone(&platform);
            let cancel = cancel.clone();
            tokio::spawn(async move { platform.run(tx, cancel).await })
        };

        let started = Instant::now();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.destination, Destination::AllRegistered);
        assert_eq!(first.author, SIMULATED_AUTHOR);
        assert_eq!(first.channel_name, SIMULATED_CHANNEL);
        assert!(first.text.starts_with("Time "));

        let _second = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(SIMULATED_TICK_INTERVAL_MS));

        cancel.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let platform = SimulatedPlatform::with_interval(Duration::from_millis(1));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        platform.run(tx, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn send_is_a_no_op() {
        let platform = SimulatedPlatform::new();
        platform.send(Address::new(1, 2), "hello").await.unwrap();
        let status = platform.status().await;
        assert_eq!(status.kind, "simulated");
        assert_eq!(status.user.as_deref(), Some(SIMULATED_USER));
    }
}
