//! Event panel configuration
//!
//! Server endpoint, window sizes, timer cadences and correlation policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::clock::{MILLIS_PER_MINUTE, MILLIS_PER_SEC};
use crate::error::PanelError;

/// How outbound messages are paired with their echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Key by exact message text only. Two identical texts in flight collide
    /// and the most recent send wins.
    Text,
    /// Attach a `correlation_id` to every send and match on it when the
    /// server echoes it back; replies without an id fall back to text.
    #[default]
    Tagged,
}

/// What to do when a reply appears to arrive before its send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockSkewPolicy {
    /// Consume the pending send but record no latency.
    #[default]
    Discard,
    /// Consume the pending send and record a latency of 0 ms.
    ClampToZero,
}

/// Ceiling for every millisecond setting (one day).
pub const MAX_DURATION_MS: u64 = 24 * 3_600 * MILLIS_PER_SEC as u64;

/// Event panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// WebSocket endpoint of the event server
    #[serde(default = "default_url")]
    pub url: String,

    /// Delay before an automatic reconnect (ms)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Give up on a connection attempt after this long (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Statistics refresh cadence (ms)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Event store capacity
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Latency series capacity
    #[serde(default = "default_max_latency_points")]
    pub max_latency_points: usize,

    /// Pending sends older than this are dropped (ms)
    #[serde(default = "default_pending_max_age_ms")]
    pub pending_max_age_ms: u64,

    /// Trailing window for the events-per-minute rate (ms)
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    #[serde(default)]
    pub correlation: CorrelationMode,

    #[serde(default)]
    pub clock_skew: ClockSkewPolicy,
}

fn default_url() -> String {
    "ws://localhost:8000/ws/events".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_refresh_interval_ms() -> u64 {
    1_000
}
fn default_max_events() -> usize {
    100
}
fn default_max_latency_points() -> usize {
    50
}
fn default_pending_max_age_ms() -> u64 {
    10_000
}
fn default_rate_window_ms() -> u64 {
    MILLIS_PER_MINUTE as u64
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            max_events: default_max_events(),
            max_latency_points: default_max_latency_points(),
            pending_max_age_ms: default_pending_max_age_ms(),
            rate_window_ms: default_rate_window_ms(),
            correlation: CorrelationMode::default(),
            clock_skew: ClockSkewPolicy::default(),
        }
    }
}

impl PanelConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment or default path
    pub fn from_env() -> Self {
        let path = std::env::var("EVENT_PANEL_CONFIG")
            .unwrap_or_else(|_| "event_panel.toml".to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default panel config ({}): {}", path, e);
            Self::default()
        });

        if let Ok(url) = std::env::var("EVENT_PANEL_URL") {
            if !url.trim().is_empty() {
                config.url = url.trim().to_string();
            }
        }

        config
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(PanelError::Config(format!(
                "url must start with ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.max_events == 0 {
            return Err(PanelError::Config("max_events must be > 0".into()));
        }
        if self.max_latency_points == 0 {
            return Err(PanelError::Config("max_latency_points must be > 0".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(PanelError::Config("refresh_interval_ms must be > 0".into()));
        }
        if self.rate_window_ms == 0 {
            return Err(PanelError::Config("rate_window_ms must be > 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PanelError::Config("connect_timeout_ms must be > 0".into()));
        }
        for (name, value) in [
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("pending_max_age_ms", self.pending_max_age_ms),
            ("rate_window_ms", self.rate_window_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(PanelError::Config(format!(
                    "{} must be <= {} ms, got {}",
                    name, MAX_DURATION_MS, value
                )));
            }
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}
