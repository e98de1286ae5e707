//! Config schema types (server, platform, status, demo page, limits).

use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    serde::Deserialize,
};

use hermes_protocol::{DEFAULT_OUTBOUND_QUEUE, DEFAULT_SEND_TIMEOUT_MS};

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HermesConfig {
    pub server: ServerConfig,
    pub platform: PlatformConfig,
    pub status: StatusConfig,
    pub demo: DemoConfig,
    pub limits: LimitsConfig,
}

impl HermesConfig {
    /// Reject combinations the gateway cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.platform.kind == PlatformKind::Discord && self.platform.discord_token.is_none() {
            anyhow::bail!(
                "platform.kind = \"discord\" requires a token (platform.discord_token or DISCORD_TOKEN)"
            );
        }
        if self.limits.outbound_queue == 0 {
            anyhow::bail!("limits.outbound_queue must be at least 1");
        }
        if self.limits.send_timeout_ms == 0 {
            anyhow::bail!("limits.send_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8004,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Live Discord bot connection.
    #[default]
    Discord,
    /// Offline stand-in that emits a timestamp every few seconds.
    Simulated,
}

impl PlatformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Simulated => "simulated",
        }
    }
}

/// Which chat platform to bridge to.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub kind: PlatformKind,
    pub discord_token: Option<SecretString>,
}

/// Credentials guarding `/status`. The endpoint is disabled unless both are set.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl StatusConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.expose_secret().as_str())),
            _ => None,
        }
    }
}

/// Values substituted into the bundled demo page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub websocket_server: String,
    pub guild_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Deadline for one send to the platform or to a client.
    pub send_timeout_ms: u64,
    /// Outbound frames buffered per client connection.
    pub outbound_queue: usize,
    /// How long shutdown waits for connection tasks to drain.
    pub shutdown_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl LimitsConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HermesConfig::default();
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.server.port, 8004);
        assert_eq!(cfg.platform.kind, PlatformKind::Discord);
        assert!(cfg.status.credentials().is_none());
        assert_eq!(cfg.limits.send_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn discord_without_token_is_invalid() {
        let cfg = HermesConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn simulated_needs_no_token() {
        let mut cfg = HermesConfig::default();
        cfg.platform.kind = PlatformKind::Simulated;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_queue_is_invalid() {
        let mut cfg = HermesConfig::default();
        cfg.platform.kind = PlatformKind::Simulated;
        cfg.limits.outbound_queue = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn status_credentials_need_both_halves() {
        let mut status = StatusConfig {
            username: Some("admin".into()),
            password: None,
        };
        assert!(status.credentials().is_none());
        status.password = Some(SecretString::new("pw".into()));
        assert_eq!(status.credentials(), Some(("admin", "pw")));
    }
}
