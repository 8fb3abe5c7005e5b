//! Connection lifecycle state machine.
//!
//! Owns the `Connecting -> Connected -> Disconnected` lifecycle and the
//! reconnect timer. The timer is a deadline rather than a spawned task: the
//! transport driver sleeps until [`ConnectionMachine::reconnect_deadline`] and
//! then calls [`ConnectionMachine::poll_reconnect`]. At most one deadline
//! exists at a time.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{millis_from_u64, Millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by one reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect_delay_ms: Millis,
    reconnect_at: Option<Millis>,
    connected_at: Option<Millis>,
    /// Set by a deliberate disconnect; suppresses automatic reconnects until
    /// `reconnect()` is requested.
    manual_hold: bool,
    reconnect_attempts: u64,
    connections: u64,
}

impl ConnectionMachine {
    pub fn new(reconnect_delay_ms: u64) -> Self {
        Self {
            state: ConnectionState::Connecting,
            reconnect_delay_ms: millis_from_u64(reconnect_delay_ms),
            reconnect_at: None,
            connected_at: None,
            manual_hold: false,
            reconnect_attempts: 0,
            connections: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sends are only allowed on an open connection.
    #[inline]
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Start of the current uptime window, if a connection was ever opened.
    #[inline]
    pub fn connected_at(&self) -> Option<Millis> {
        self.connected_at
    }

    #[inline]
    pub fn reconnect_deadline(&self) -> Option<Millis> {
        self.reconnect_at
    }

    #[inline]
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// True after `disconnect()` until `reconnect()`.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.manual_hold
    }

    /// Number of times the reconnect timer fired.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Number of successful opens.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    /// Transport opened. Only valid while `Connecting`; a late open after a
    /// deliberate disconnect is rejected so the caller can close it.
    pub fn on_open(&mut self, now: Millis) -> Option<Transition> {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Ignoring open outside of connecting state");
            return None;
        }
        self.cancel_reconnect();
        self.connected_at = Some(now);
        self.connections += 1;
        info!(connections = self.connections, "✅ Connection established");
        Some(self.set_state(ConnectionState::Connected))
    }

    /// Transport closed (clean or abrupt).
    pub fn on_close(&mut self, now: Millis, reason: &str) -> Option<Transition> {
        info!(reason, "🔌 Connection closed");
        self.drop_connection(now)
    }

    /// Transport failed. Resolves exactly like a close.
    pub fn on_error(&mut self, now: Millis, reason: &str) -> Option<Transition> {
        warn!(reason, "Transport error");
        self.drop_connection(now)
    }

    /// Deliberate, user-initiated disconnect. Cancels any pending reconnect
    /// so the machine does not fight the user.
    pub fn disconnect(&mut self) -> Option<Transition> {
        self.manual_hold = true;
        self.cancel_reconnect();
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        info!("🔌 Disconnecting on request");
        Some(self.set_state(ConnectionState::Disconnected))
    }

    /// Explicit reconnect request. Lifts a manual hold and starts connecting
    /// immediately.
    pub fn reconnect(&mut self) -> Option<Transition> {
        self.manual_hold = false;
        if self.state != ConnectionState::Disconnected {
            return None;
        }
        self.cancel_reconnect();
        info!("🔄 Reconnecting on request");
        Some(self.set_state(ConnectionState::Connecting))
    }

    /// Fire the reconnect timer if it is due.
    pub fn poll_reconnect(&mut self, now: Millis) -> Option<Transition> {
        let deadline = self.reconnect_at?;
        if now < deadline {
            return None;
        }
        self.reconnect_at = None;
        if self.state != ConnectionState::Disconnected {
            return None;
        }
        self.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempts, "🔄 Reconnect timer fired");
        Some(self.set_state(ConnectionState::Connecting))
    }

    fn drop_connection(&mut self, now: Millis) -> Option<Transition> {
        let transition = if self.state == ConnectionState::Disconnected {
            None
        } else {
            Some(self.set_state(ConnectionState::Disconnected))
        };
        if !self.manual_hold {
            self.schedule_reconnect(now);
        }
        transition
    }

    /// Idempotent: a second schedule while one is pending is a no-op.
    fn schedule_reconnect(&mut self, now: Millis) {
        if self.reconnect_at.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }
        self.reconnect_at = Some(now.saturating_add(self.reconnect_delay_ms));
        info!(delay_ms = self.reconnect_delay_ms, "🔄 Reconnect scheduled");
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Reconnect timer cancelled");
        }
    }

    fn set_state(&mut self, to: ConnectionState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}
