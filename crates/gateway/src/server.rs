use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context as _,
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderMap, StatusCode, header},
        response::{Html, IntoResponse, Json, Response},
        routing::get,
    },
    tokio::{net::TcpListener, sync::mpsc},
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info, warn},
};

use {
    hermes_channels::{ChatPlatform, SimulatedPlatform},
    hermes_config::{HermesConfig, PlatformConfig, PlatformKind},
    hermes_discord::DiscordPlatform,
};

use crate::{
    auth::{BasicAuth, check_basic},
    registry::ConnectionRegistry,
    routing::RoutingEngine,
    state::GatewayState,
    ws::{handle_socket, peer_info},
};

/// Platform events buffered between the adapter and the fan-out loop.
const PLATFORM_EVENT_BUFFER: usize = 256;

const DEMO_PAGE: &str = include_str!("assets/demo.html");

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/demo", get(demo_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Instantiate the chat platform selected in config.
pub fn build_platform(config: PlatformConfig) -> anyhow::Result<Arc<dyn ChatPlatform>> {
    Ok(match config.kind {
        PlatformKind::Discord => {
            let token = config
                .discord_token
                .context("discord platform selected but no token configured")?;
            Arc::new(DiscordPlatform::new(token))
        },
        PlatformKind::Simulated => Arc::new(SimulatedPlatform::new()),
    })
}

/// Build shared state around an already constructed platform.
pub fn build_state(config: HermesConfig, platform: Arc<dyn ChatPlatform>) -> Arc<GatewayState> {
    let engine = Arc::new(RoutingEngine::new(
        Arc::new(ConnectionRegistry::new()),
        platform,
        config.limits.send_timeout(),
    ));
    GatewayState::new(engine, config.status, config.demo, config.limits)
}

/// Start the gateway HTTP + WebSocket server and run it until Ctrl-C.
pub async fn start_gateway(mut config: HermesConfig) -> anyhow::Result<()> {
    let kind = config.platform.kind;
    let platform = build_platform(std::mem::take(&mut config.platform))?;
    let server = config.server.clone();
    let state = build_state(config, platform);

    let addr: SocketAddr = format!("{}:{}", server.bind, server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", server.bind, server.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("hermes gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("platform: {}", kind.as_str()),
        format!(
            "status endpoint: {}",
            if state.status.credentials().is_some() {
                "enabled"
            } else {
                "disabled"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    run_gateway(state, listener).await
}

/// Serve on `listener` until `state.cancel` fires, then shut down in order:
/// stop accepting, let connection tasks post their announcements, then stop
/// the platform.
pub async fn run_gateway(state: Arc<GatewayState>, listener: TcpListener) -> anyhow::Result<()> {
    let platform_cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(PLATFORM_EVENT_BUFFER);

    let platform_task = {
        let platform = Arc::clone(state.engine.platform());
        let cancel = platform_cancel.clone();
        let gateway_cancel = state.cancel.clone();
        tokio::spawn(async move {
            let result = platform.run(events_tx, cancel).await;
            if let Err(e) = &result {
                error!(platform = platform.id(), error = %e, "platform connection failed");
                gateway_cancel.cancel();
            }
            result
        })
    };
    let events_task = {
        let engine = Arc::clone(&state.engine);
        let cancel = platform_cancel.clone();
        tokio::spawn(async move { engine.run_platform_events(events_rx, cancel).await })
    };

    let app = build_gateway_app(Arc::clone(&state));
    let shutdown = state.cancel.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("http server failed");

    state.cancel.cancel();
    state.tasks.close();
    if tokio::time::timeout(state.limits.shutdown_grace(), state.tasks.wait())
        .await
        .is_err()
    {
        warn!(remaining = state.tasks.len(), "connections did not drain in time");
    }

    platform_cancel.cancel();
    if let Err(e) = events_task.await {
        warn!(error = %e, "platform event loop failed");
    }
    let platform_result = platform_task.await.context("platform task failed")?;
    info!("gateway stopped");

    served?;
    platform_result
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler() -> &'static str {
    "Up and Alive\n"
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": state.client_count().await,
    }))
}

async fn demo_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let demo = &state.demo;
    Html(
        DEMO_PAGE
            .replace("DEMO_WEBSOCKET_SERVER", &demo.websocket_server)
            .replace("DEMO_DISCORD_GUILDID", &demo.guild_id)
            .replace("DEMO_DISCORD_CHANNELID", &demo.channel_id),
    )
}

async fn status_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    let Some((username, password)) = state.status.credentials() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match check_basic(&headers, username, password) {
        BasicAuth::Granted => {},
        BasicAuth::Malformed => return StatusCode::BAD_REQUEST.into_response(),
        BasicAuth::Missing | BasicAuth::Denied => {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=Status")],
            )
                .into_response();
        },
    }

    Json(serde_json::json!({
        "runtime_seconds": state.started_at.elapsed().as_secs(),
        "web": {
            "connected": state.connection_summaries().await,
            "count_connections": state.registry().accepted_total(),
        },
        "platform": state.engine.platform().status().await,
    }))
    .into_response()
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    if state.cancel.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let peer = peer_info(addr, &headers);
    ws.on_upgrade(move |socket| {
        let tasks = state.tasks.clone();
        tasks.track_future(handle_socket(socket, state, peer))
    })
}
