use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use huddle_gateway::HubConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared with the auth service that signs identity tokens.
    pub jwt_secret: String,
    pub hub: HubConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("HUDDLE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HUDDLE_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let defaults = HubConfig::default();
        let hub = HubConfig {
            room_capacity: parse_or(&lookup, "HUDDLE_ROOM_CAPACITY", defaults.room_capacity)?,
            typing_timeout: Duration::from_millis(parse_or(&lookup, "HUDDLE_TYPING_TIMEOUT_MS", 3000)?),
            ring_timeout: Duration::from_secs(parse_or(&lookup, "HUDDLE_RING_TIMEOUT_SECS", 30)?),
            reconnect_grace: Duration::from_millis(parse_or(&lookup, "HUDDLE_RECONNECT_GRACE_MS", 5000)?),
            idle_room_ttl: Duration::from_secs(parse_or(&lookup, "HUDDLE_IDLE_ROOM_SECS", 300)?),
            outbound_queue: parse_or(&lookup, "HUDDLE_OUTBOUND_QUEUE", defaults.outbound_queue)?,
            ..defaults
        };
        if hub.room_capacity == 0 {
            bail!("HUDDLE_ROOM_CAPACITY must be at least 1");
        }

        Ok(Self {
            host: lookup("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "HUDDLE_PORT", 3000)?,
            jwt_secret,
            hub,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
