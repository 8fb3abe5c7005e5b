//! Engine error type.
//!
//! None of these are fatal: the worst outcome of any of them is a dropped
//! frame, a rejected send or a delayed reconnect.

/// Errors surfaced by the engine and the transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    /// Send attempted while the transport is not open. Never queued.
    NotConnected,
    /// Send attempted with an empty (or whitespace-only) message.
    EmptyMessage,
    /// Inbound frame was not valid JSON or lacked required fields.
    Malformed(String),
    /// Server signaled an application error via `{"error": ...}`.
    Server(String),
    /// Connection refused, abrupt close, write failure.
    Transport(String),
    /// Invalid configuration value.
    Config(String),
    /// The transport driver task is gone.
    Shutdown,
}

impl std::fmt::Display for PanelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to server"),
            Self::EmptyMessage => write!(f, "message is empty"),
            Self::Malformed(reason) => write!(f, "malformed frame: {}", reason),
            Self::Server(reason) => write!(f, "server error: {}", reason),
            Self::Transport(reason) => write!(f, "transport error: {}", reason),
            Self::Config(reason) => write!(f, "invalid config: {}", reason),
            Self::Shutdown => write!(f, "panel client has shut down"),
        }
    }
}

impl std::error::Error for PanelError {}
