//! Routing engine: the per-connection registration state machine and the
//! fan-out between the chat platform and client connections.
//!
//! ```text
//! Unregistered --text--> Registered
//!      |                     |
//!      +----disconnect-------+--> Terminated
//! ```
//!
//! `ping` is answered with `pong` in any live state without touching the
//! platform. The engine is the only component that sees both sides.

use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use {
    hermes_channels::{ChatPlatform, Destination, PlatformEvent},
    hermes_protocol::{Address, ClientFrame, FrameError, ServerFrame, TextFrame},
};

use crate::{
    connection::{Connection, ConnectionState, SinkError},
    registry::{ConnectionRegistry, RegistryError},
    transport::DisconnectReason,
};

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("reply failed: {0}")]
    Reply(#[from] SinkError),

    #[error("connection already terminated")]
    Terminated,
}

pub struct RoutingEngine {
    registry: Arc<ConnectionRegistry>,
    platform: Arc<dyn ChatPlatform>,
    send_timeout: Duration,
}

impl RoutingEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        platform: Arc<dyn ChatPlatform>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            platform,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    // ── Client side ──────────────────────────────────────────────────────────

    /// Track a freshly accepted connection.
    pub async fn accept(&self, conn: Arc<Connection>) -> Result<(), RoutingError> {
        let conn_id = conn.id();
        self.registry.add(conn).await?;
        info!(%conn_id, "client connected");
        Ok(())
    }

    /// Apply one inbound frame. Frames of one connection must be fed in
    /// arrival order, one at a time.
    pub async fn handle_frame(
        &self,
        conn: &Connection,
        frame: ClientFrame,
    ) -> Result<(), RoutingError> {
        if conn.state() == ConnectionState::Terminated {
            return Err(RoutingError::Terminated);
        }
        match frame {
            ClientFrame::Ping => {
                trace!(conn_id = %conn.id(), "ping");
                conn.send(ServerFrame::Pong).await?;
            },
            ClientFrame::Text(text) => match conn.address() {
                // Address/announcement fields on later frames are ignored.
                Some(address) => self.deliver(address, &text.text).await,
                None => self.register(conn, text).await?,
            },
        }
        Ok(())
    }

    async fn register(&self, conn: &Connection, frame: TextFrame) -> Result<(), RoutingError> {
        let registration = frame.registration()?;
        let address = registration.address;
        let announcement = registration.connected_msg.clone();
        self.registry.register(conn, registration).await?;
        info!(conn_id = %conn.id(), %address, "client registered");

        self.deliver(address, &announcement).await;
        self.deliver(address, &frame.text).await;
        Ok(())
    }

    /// Terminate a connection: drop it from the registry and post its
    /// disconnect announcement. Only the first call for a connection acts.
    pub async fn disconnect(&self, conn: &Connection, reason: DisconnectReason) {
        if !conn.terminate() {
            return;
        }
        let conn_id = conn.id();
        self.registry.remove(conn_id).await;

        match &reason {
            DisconnectReason::Error(error) => warn!(%conn_id, %error, "client transport error"),
            other => info!(%conn_id, reason = ?other, "client disconnected"),
        }

        match conn.address() {
            Some(address) => self.deliver(address, conn.disconnected_msg()).await,
            None => debug!(%conn_id, "client never registered, no announcement"),
        }
    }

    /// Best-effort send to the platform, bounded by the send deadline.
    async fn deliver(&self, address: Address, text: &str) {
        match tokio::time::timeout(self.send_timeout, self.platform.send(address, text)).await {
            Ok(Ok(())) => trace!(%address, "delivered to platform"),
            Ok(Err(e)) if e.is_address_not_found() => {
                debug!(%address, error = %e, "platform address not found, message dropped");
            },
            Ok(Err(e)) => warn!(%address, error = %e, "platform send failed, message dropped"),
            Err(_) => warn!(%address, timeout_ms = self.send_timeout.as_millis() as u64, "platform send timed out"),
        }
    }

    // ── Platform side ────────────────────────────────────────────────────────

    /// Fan one platform message out to the matching registered connections.
    ///
    /// Sends run concurrently, each under the send deadline; a failing client
    /// does not affect the others. Returns how many clients received it.
    pub async fn dispatch(&self, event: PlatformEvent) -> usize {
        let targets = match event.destination {
            Destination::Address(address) => self.registry.matching(address).await,
            Destination::AllRegistered => self.registry.registered().await,
        };
        if targets.is_empty() {
            trace!(destination = ?event.destination, "no clients for platform message");
            return 0;
        }

        let frame = ServerFrame::text(event.author, event.channel_name, event.text);
        let sends = targets.iter().map(|conn| {
            let frame = frame.clone();
            async move {
                match tokio::time::timeout(self.send_timeout, conn.send(frame)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(conn_id = %conn.id(), error = %e, "client send failed");
                        false
                    },
                    Err(_) => {
                        warn!(conn_id = %conn.id(), "client send timed out");
                        false
                    },
                }
            }
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    /// Consume platform events until cancelled or the platform goes away.
    pub async fn run_platform_events(
        &self,
        mut events: mpsc::Receiver<PlatformEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("platform event stream closed");
                        break;
                    },
                },
            };
            let delivered = self.dispatch(event).await;
            trace!(delivered, "platform message fanned out");
        }
    }
}


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::{
            testing::{RecordingPlatform, engine, engine_with},
            *,
        },
        crate::connection::{
            PeerInfo,
            testing::{RecordingSink, connection},
        },
        hermes_protocol::parse_client_frame,
    };

    fn frame(raw: &str) -> ClientFrame {
        parse_client_frame(raw).unwrap()
    }

    fn register_frame(community: u64, channel: u64, text: &str) -> ClientFrame {
        frame(&format!(
            r#"{{"type":"text","guildid":{community},"channelid":{channel},"connectedMsg":"Connected","disconnectedMsg":"Disconnected","text":"{text}"}}"#
        ))
    }

    fn sent(pairs: &[(u64, u64, &str)]) -> Vec<(Address, String)> {
        pairs
            .iter()
            .map(|(g, c, t)| (Address::new(*g, *c), t.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn ping_replies_pong_without_state_change() {
        let (engine, platform) = engine();
        let (conn, sink) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        engine.handle_frame(&conn, ClientFrame::Ping).await.unwrap();

        assert_eq!(sink.frames(), vec![ServerFrame::Pong]);
        assert_eq!(conn.state(), ConnectionState::Unregistered);
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn first_text_registers_and_announces_in_order() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        assert_eq!(conn.state(), ConnectionState::Registered);
        assert_eq!(conn.address(), Some(Address::new(1, 2)));
        assert_eq!(platform.sent(), sent(&[(1, 2, "Connected"), (1, 2, "hello")]));
    }

    #[tokio::test]
    async fn later_text_is_forwarded_without_announcement_or_rebinding() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        // Different address in a later frame is ignored.
        engine
            .handle_frame(&conn, register_frame(9, 9, "second"))
            .await
            .unwrap();
        engine
            .handle_frame(&conn, frame(r#"{"type":"text","text":"third"}"#))
            .await
            .unwrap();

        assert_eq!(conn.address(), Some(Address::new(1, 2)));
        assert_eq!(
            platform.sent(),
            sent(&[
                (1, 2, "Connected"),
                (1, 2, "hello"),
                (1, 2, "second"),
                (1, 2, "third"),
            ])
        );
    }

    #[tokio::test]
    async fn malformed_registration_leaves_connection_unregistered() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        let err = engine
            .handle_frame(&conn, frame(r#"{"type":"text","text":"no address"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, RoutingError::Malformed(_)));
        assert_eq!(conn.state(), ConnectionState::Unregistered);
        assert!(platform.sent().is_empty());

        // The connection keeps working afterwards.
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Registered);
    }

    #[tokio::test]
    async fn disconnect_after_registration_announces_once() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        engine.disconnect(&conn, DisconnectReason::Closed).await;
        engine.disconnect(&conn, DisconnectReason::Abrupt).await;

        assert_eq!(conn.state(), ConnectionState::Terminated);
        assert!(!engine.registry().contains(conn.id()).await);
        assert_eq!(
            platform.sent(),
            sent(&[(1, 2, "Connected"), (1, 2, "hello"), (1, 2, "Disconnected")])
        );

        // Nothing reaches the departed client.
        let delivered = engine
            .dispatch(PlatformEvent::at(Address::new(1, 2), "Bob", "general", "hi"))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn disconnect_before_registration_sends_nothing() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        engine
            .disconnect(&conn, DisconnectReason::Error("reset".into()))
            .await;

        assert!(engine.registry().is_empty().await);
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn terminated_connection_ignores_frames() {
        let (engine, platform) = engine();
        let (conn, sink) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine.disconnect(&conn, DisconnectReason::Closed).await;

        assert!(matches!(
            engine.handle_frame(&conn, ClientFrame::Ping).await,
            Err(RoutingError::Terminated)
        ));
        assert!(matches!(
            engine.handle_frame(&conn, register_frame(1, 2, "late")).await,
            Err(RoutingError::Terminated)
        ));
        assert!(sink.frames().is_empty());
        assert!(platform.sent().is_empty());
    }

    #[tokio::test]
    async fn fan_out_reaches_exact_address_only() {
        let (engine, _) = engine();
        let (a, sink_a) = connection();
        let (b, sink_b) = connection();
        let (a2, sink_a2) = connection();
        let (idle, sink_idle) = connection();
        for conn in [&a, &b, &a2, &idle] {
            engine.accept(Arc::clone(conn)).await.unwrap();
        }
        engine.handle_frame(&a, register_frame(1, 2, "x")).await.unwrap();
        engine.handle_frame(&b, register_frame(1, 3, "x")).await.unwrap();
        engine.handle_frame(&a2, register_frame(1, 2, "x")).await.unwrap();

        let delivered = engine
            .dispatch(PlatformEvent::at(Address::new(1, 2), "Bob", "general", "hi"))
            .await;

        assert_eq!(delivered, 2);
        let expected = vec![ServerFrame::text("Bob", "general", "hi")];
        assert_eq!(sink_a.frames(), expected);
        assert_eq!(sink_a2.frames(), expected);
        assert!(sink_b.frames().is_empty());
        assert!(sink_idle.frames().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_client() {
        let (engine, _) = engine();
        let (a, sink_a) = connection();
        let (b, sink_b) = connection();
        let (idle, sink_idle) = connection();
        for conn in [&a, &b, &idle] {
            engine.accept(Arc::clone(conn)).await.unwrap();
        }
        engine.handle_frame(&a, register_frame(1, 2, "x")).await.unwrap();
        engine.handle_frame(&b, register_frame(7, 8, "x")).await.unwrap();

        let delivered = engine
            .dispatch(PlatformEvent {
                destination: Destination::AllRegistered,
                author: "FakeAuthor".into(),
                channel_name: "FakeChannel".into(),
                text: "Time 1".into(),
            })
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(sink_a.frames().len(), 1);
        assert_eq!(sink_b.frames().len(), 1);
        assert!(sink_idle.frames().is_empty());
    }

    #[tokio::test]
    async fn failing_client_does_not_block_others() {
        let (engine, _) = engine();
        let broken = Arc::new(Connection::new(RecordingSink::failing(), PeerInfo::default()));
        let (healthy, sink) = connection();
        for conn in [&broken, &healthy] {
            engine.accept(Arc::clone(conn)).await.unwrap();
            engine
                .handle_frame(conn, register_frame(1, 2, "x"))
                .await
                .unwrap();
        }

        let delivered = engine
            .dispatch(PlatformEvent::at(Address::new(1, 2), "Bob", "general", "hi"))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(sink.frames(), vec![ServerFrame::text("Bob", "general", "hi")]);
    }

    #[tokio::test]
    async fn duplicate_accept_is_refused() {
        let (engine, _) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        assert!(matches!(
            engine.accept(Arc::clone(&conn)).await,
            Err(RoutingError::Registry(RegistryError::DuplicateConnection(_)))
        ));
    }

    #[tokio::test]
    async fn event_loop_stops_on_cancel() {
        let (engine, _) = engine();
        let (conn, sink) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine.handle_frame(&conn, register_frame(1, 2, "x")).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(PlatformEvent::at(Address::new(1, 2), "Bob", "general", "one"))
            .await
            .unwrap();
        drop(tx);

        // Closed stream ends the loop after draining.
        engine
            .run_platform_events(rx, CancellationToken::new())
            .await;
        assert_eq!(sink.frames(), vec![ServerFrame::text("Bob", "general", "one")]);

        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        engine.run_platform_events(rx, cancel).await;
    }

    #[tokio::test]
    async fn junk_address_fields_after_registration_are_ignored() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        for raw in [
            r#"{"type":"text","guildid":"general","text":"one"}"#,
            r#"{"type":"text","guildid":-1,"channelid":null,"text":"two"}"#,
            r#"{"type":"text","connectedMsg":5,"disconnectedMsg":{"x":1},"text":"three"}"#,
        ] {
            engine.handle_frame(&conn, frame(raw)).await.unwrap();
        }

        assert_eq!(conn.address(), Some(Address::new(1, 2)));
        assert_eq!(conn.disconnected_msg(), "Disconnected");
        assert_eq!(
            platform.sent(),
            sent(&[
                (1, 2, "Connected"),
                (1, 2, "hello"),
                (1, 2, "one"),
                (1, 2, "two"),
                (1, 2, "three"),
            ])
        );
    }

    #[tokio::test]
    async fn junk_address_fields_on_first_frame_are_malformed() {
        let (engine, platform) = engine();
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        let err = engine
            .handle_frame(
                &conn,
                frame(
                    r#"{"type":"text","guildid":"general","channelid":2,"connectedMsg":"a","disconnectedMsg":"b","text":"hi"}"#,
                ),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RoutingError::Malformed(FrameError::InvalidField { field: "guildid", .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Unregistered);
        assert!(platform.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_is_abandoned_after_deadline() {
        let (engine, _) = engine();
        let stuck = Arc::new(Connection::new(RecordingSink::stalled(), PeerInfo::default()));
        let (healthy, sink) = connection();
        for conn in [&stuck, &healthy] {
            engine.accept(Arc::clone(conn)).await.unwrap();
            engine
                .handle_frame(conn, register_frame(1, 2, "x"))
                .await
                .unwrap();
        }

        let started = tokio::time::Instant::now();
        let delivered = engine
            .dispatch(PlatformEvent::at(Address::new(1, 2), "Bob", "general", "hi"))
            .await;
        let elapsed = started.elapsed();

        assert_eq!(delivered, 1);
        assert_eq!(sink.frames(), vec![ServerFrame::text("Bob", "general", "hi")]);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_announcement_does_not_hold_back_text() {
        let (engine, platform) = engine_with(RecordingPlatform::stalling_on("Connected"));
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();

        let started = tokio::time::Instant::now();
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Registered);
        assert_eq!(platform.sent(), sent(&[(1, 2, "hello")]));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_departure_announcement_still_completes_cleanup() {
        let (engine, platform) = engine_with(RecordingPlatform::stalling_on("Disconnected"));
        let (conn, _) = connection();
        engine.accept(Arc::clone(&conn)).await.unwrap();
        engine
            .handle_frame(&conn, register_frame(1, 2, "hello"))
            .await
            .unwrap();

        engine.disconnect(&conn, DisconnectReason::Closed).await;

        assert_eq!(conn.state(), ConnectionState::Terminated);
        assert!(engine.registry().is_empty().await);
        assert_eq!(platform.sent(), sent(&[(1, 2, "Connected"), (1, 2, "hello")]));
    }
}
