use std::{collections::BTreeMap, sync::Arc, time::Instant};

use {
    serde::Serialize,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
};

use hermes_config::{DemoConfig, LimitsConfig, StatusConfig};

use crate::{
    connection::{Connection, ConnectionState},
    registry::ConnectionRegistry,
    routing::RoutingEngine,
};

// ── Status view ──────────────────────────────────────────────────────────────

/// One live connection as reported by the status endpoint.
#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub conn_id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub guildid: Option<String>,
    pub channelid: Option<String>,
    #[serde(rename = "connectedMsg")]
    pub connected_msg: String,
    #[serde(rename = "disconnectedMsg")]
    pub disconnected_msg: String,
    pub state: ConnectionState,
    pub connected_secs: u64,
}

impl ConnectionSummary {
    // Ids go out as strings: they exceed what a JS number holds exactly.
    // Announcements fall back to the defaults until the client registers.
    fn of(conn: &Connection) -> Self {
        let peer = conn.peer();
        let registration = conn.registration();
        Self {
            conn_id: conn.id().to_string(),
            host: peer.host.clone(),
            port: peer.port,
            headers: peer.headers.clone(),
            guildid: registration.map(|r| r.address.community.to_string()),
            channelid: registration.map(|r| r.address.channel.to_string()),
            connected_msg: conn.connected_msg().to_string(),
            disconnected_msg: conn.disconnected_msg().to_string(),
            state: conn.state(),
            connected_secs: conn.connected_at().elapsed().as_secs(),
        }
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared state behind every HTTP and WebSocket handler.
pub struct GatewayState {
    pub started_at: Instant,
    pub version: String,
    pub engine: Arc<RoutingEngine>,
    pub status: StatusConfig,
    pub demo: DemoConfig,
    pub limits: LimitsConfig,
    /// Cancelled when the gateway begins shutting down.
    pub cancel: CancellationToken,
    /// Connection tasks, drained before the platform is stopped.
    pub tasks: TaskTracker,
}

impl GatewayState {
    pub fn new(
        engine: Arc<RoutingEngine>,
        status: StatusConfig,
        demo: DemoConfig,
        limits: LimitsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine,
            status,
            demo,
            limits,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.engine.registry()
    }

    pub async fn client_count(&self) -> usize {
        self.registry().len().await
    }

    pub async fn connection_summaries(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<_> = self
            .registry()
            .snapshot()
            .await
            .iter()
            .map(|conn| ConnectionSummary::of(conn))
            .collect();
        summaries.sort_by(|a, b| b.connected_secs.cmp(&a.connected_secs));
        summaries
    }
}
