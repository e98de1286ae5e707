use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use hermes_config::HermesConfig;

#[derive(Parser)]
#[command(name = "hermes", about = "Hermes, a bridge between web chat clients and Discord")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (defaults to ./hermes.toml or ~/.config/hermes/hermes.toml).
    #[arg(long, global = true, env = "HERMES_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then exit.
    Doctor,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn describe(config: &HermesConfig) -> String {
    format!(
        "bind {}:{}, platform {}, status endpoint {}, send timeout {}ms, queue {} frames",
        config.server.bind,
        config.server.port,
        config.platform.kind.as_str(),
        if config.status.credentials().is_some() {
            "enabled"
        } else {
            "disabled"
        },
        config.limits.send_timeout_ms,
        config.limits.outbound_queue,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "hermes starting");

    let mut config = hermes_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Gateway { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            hermes_gateway::start_gateway(config).await
        },
        Commands::Doctor => {
            println!("config ok: {}", describe(&config));
            Ok(())
        },
    }
}
