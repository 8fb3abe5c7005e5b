//! Event Panel Library
//!
//! Real-time metrics and round-trip latency for a WebSocket event stream.
//! The engine is sans-IO; `client` drives it from a tokio-tungstenite socket.

pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod wire;

pub use client::{PanelClient, PanelHandle};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::{ClockSkewPolicy, CorrelationMode, PanelConfig};
pub use engine::{
    ConnectionState, Event, EventPanel, LatencySample, Metrics, PanelSnapshot, PanelUpdate,
};
pub use error::PanelError;
