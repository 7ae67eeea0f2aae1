use log::warn;
use relay_core::backoff::{Jitter, ReconnectPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AUTH_PATH: &str = "./auth_info";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Throttling for the batched group operations.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    /// Pause before each broadcast send.
    pub send_jitter: Jitter,
    /// Pause before the single retry of a failed send.
    pub retry_backoff: Duration,
    /// Pause before clearing each recipient's history.
    pub clear_jitter: Jitter,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_jitter: Jitter::around(Duration::from_millis(1500), Duration::from_millis(300)),
            retry_backoff: Duration::from_millis(2000),
            clear_jitter: Jitter::between(Duration::from_millis(1000), Duration::from_millis(2000)),
        }
    }
}

impl DispatchConfig {
    /// No pauses at all; useful for embedding in tests.
    pub fn immediate() -> Self {
        Self {
            send_jitter: Jitter::fixed(Duration::ZERO),
            retry_backoff: Duration::ZERO,
            clear_jitter: Jitter::fixed(Duration::ZERO),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Directory holding the persisted credentials.
    pub auth_path: PathBuf,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub dispatch: DispatchConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_path: PathBuf::from(DEFAULT_AUTH_PATH),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Loads a `.env` file if present, then reads the environment.
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(target: "Relay/Config", "Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset keys keep their
    /// defaults; malformed values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let defaults = DispatchConfig::default();

        if let Some(path) = lookup("AUTH_PATH").filter(|p| !p.trim().is_empty()) {
            config.auth_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "RECONNECT_BASE_DELAY_MS") {
            config.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = parse_var::<f64, _>(&lookup, "RECONNECT_BACKOFF_FACTOR") {
            if factor >= 1.0 {
                config.reconnect.backoff_factor = factor;
            } else {
                warn!(target: "Relay/Config", "RECONNECT_BACKOFF_FACTOR must be >= 1.0, got {factor}");
            }
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "MAX_RECONNECT_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }

        let send_base = parse_var::<u64, _>(&lookup, "SEND_DELAY_MS");
        let send_spread = parse_var::<u64, _>(&lookup, "SEND_JITTER_MS");
        if send_base.is_some() || send_spread.is_some() {
            let base = send_base.map_or(Duration::from_millis(1500), Duration::from_millis);
            let spread = send_spread.map_or(Duration::from_millis(300), Duration::from_millis);
            config.dispatch.send_jitter = Jitter::around(base, spread);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SEND_RETRY_BACKOFF_MS") {
            config.dispatch.retry_backoff = Duration::from_millis(ms);
        }

        let clear_min = parse_var::<u64, _>(&lookup, "CLEAR_DELAY_MIN_MS");
        let clear_max = parse_var::<u64, _>(&lookup, "CLEAR_DELAY_MAX_MS");
        if clear_min.is_some() || clear_max.is_some() {
            config.dispatch.clear_jitter = Jitter::between(
                clear_min.map_or(defaults.clear_jitter.min(), Duration::from_millis),
                clear_max.map_or(defaults.clear_jitter.max(), Duration::from_millis),
            );
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: "Relay/Config", "Ignoring invalid {key}={raw:?}: {e}");
            None
        }
    }
}
