use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    secrecy::SecretString,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    schema::{HermesConfig, PlatformKind},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["hermes.toml", "hermes.yaml", "hermes.yml", "hermes.json"];

/// Environment variables understood on top of the config file. The unprefixed
/// names are the ones deployments have always set in `.env`.
pub mod env_keys {
    pub const DISCORD_TOKEN: &str = "DISCORD_TOKEN";
    pub const STATUS_USERNAME: &str = "WEB_STATUS_USERNAME";
    pub const STATUS_PASSWORD: &str = "WEB_STATUS_PASSWORD";
    pub const DEMO_WEBSOCKET_SERVER: &str = "DEMO_WEBSOCKET_SERVER";
    pub const DEMO_GUILD_ID: &str = "DEMO_DISCORD_GUILDID";
    pub const DEMO_CHANNEL_ID: &str = "DEMO_DISCORD_CHANNELID";
    pub const ENABLE_FAKE_DISCORD: &str = "ENABLE_FAKE_DISCORD";
    pub const BIND: &str = "HERMES_BIND";
    pub const PORT: &str = "HERMES_PORT";
}

/// Load the effective configuration.
///
/// An explicit `path` must exist and parse. Without one, standard locations
/// are searched and defaults are used if nothing is found. Environment
/// overrides are applied last, then the result is validated.
pub fn load(path: Option<&Path>) -> anyhow::Result<HermesConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HermesConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./hermes.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/hermes/hermes.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HermesConfig::default()` if no file is found or it fails to load.
pub fn discover_and_load() -> HermesConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return HermesConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
            HermesConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory: `~/.config/hermes/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("hermes"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HermesConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Overlay environment variables on a parsed config.
///
/// Empty values are treated as unset.
pub fn apply_env_overrides(
    config: &mut HermesConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get(env_keys::DISCORD_TOKEN) {
        config.platform.discord_token = Some(SecretString::new(token));
    }
    if let Some(flag) = get(env_keys::ENABLE_FAKE_DISCORD) {
        let fake = parse_bool(&flag)
            .with_context(|| format!("{}={flag:?}", env_keys::ENABLE_FAKE_DISCORD))?;
        config.platform.kind = if fake {
            PlatformKind::Simulated
        } else {
            PlatformKind::Discord
        };
    }
    if let Some(user) = get(env_keys::STATUS_USERNAME) {
        config.status.username = Some(user);
    }
    if let Some(pass) = get(env_keys::STATUS_PASSWORD) {
        config.status.password = Some(SecretString::new(pass));
    }
    if let Some(server) = get(env_keys::DEMO_WEBSOCKET_SERVER) {
        config.demo.websocket_server = server;
    }
    if let Some(id) = get(env_keys::DEMO_GUILD_ID) {
        config.demo.guild_id = id;
    }
    if let Some(id) = get(env_keys::DEMO_CHANNEL_ID) {
        config.demo.channel_id = id;
    }
    if let Some(bind) = get(env_keys::BIND) {
        config.server.bind = bind;
    }
    if let Some(port) = get(env_keys::PORT) {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("{}={port:?} is not a port", env_keys::PORT))?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
