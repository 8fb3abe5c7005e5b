//! Metrics aggregation and latency-correlation engine.
//!
//! [`EventPanel`] is sans-IO: it never touches a socket or a timer. The
//! transport driver calls one method per external reaction (frame received,
//! socket opened/closed, timer tick, user send) and writes whatever frame
//! `send` hands back. Renderers read through pure queries (`metrics`,
//! `latency_snapshot`, `snapshot`) or subscribe to [`PanelUpdate`]s; the
//! engine keeps no reference to any of them.

pub mod connection;
pub mod pending;
pub mod series;
pub mod stats;
pub mod store;

pub use connection::{ConnectionMachine, ConnectionState, Transition};
pub use pending::{PendingSend, PendingTable};
pub use series::{LatencySample, LatencySeries};
pub use stats::{compute_metrics, format_uptime, Metrics};
pub use store::{Event, EventStore, Receipt};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::{Clock, Millis};
use crate::config::{CorrelationMode, PanelConfig};
use crate::error::PanelError;
use crate::wire::{decode_inbound, InboundFrame, InboundMessage, OutboundFrame};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Change notifications for subscribers.
#[derive(Debug, Clone)]
pub enum PanelUpdate {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    MessageSent {
        message: String,
        correlation_id: Option<String>,
        sent_at: Millis,
    },
    EventReceived(Event),
    LatencySampled(LatencySample),
    ServerError(String),
    Cleared,
    MetricsRefreshed(Metrics),
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub state: ConnectionState,
    pub metrics: Metrics,
    pub sent_events: u64,
    pub pending_sends: usize,
    pub reconnect_attempts: u64,
    pub latency: Vec<LatencySample>,
}

pub struct EventPanel {
    config: PanelConfig,
    clock: Arc<dyn Clock>,
    connection: ConnectionMachine,
    pending: PendingTable,
    store: EventStore,
    series: LatencySeries,
    sent_events: u64,
    updates: broadcast::Sender<PanelUpdate>,
}

impl EventPanel {
    pub fn new(config: PanelConfig, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            connection: ConnectionMachine::new(config.reconnect_delay_ms),
            pending: PendingTable::new(config.clock_skew),
            store: EventStore::new(config.max_events),
            series: LatencySeries::new(config.max_latency_points),
            sent_events: 0,
            updates,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelUpdate> {
        self.updates.subscribe()
    }

    // ---- connection lifecycle ----

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn can_send(&self) -> bool {
        self.connection.can_send()
    }

    pub fn reconnect_deadline(&self) -> Option<Millis> {
        self.connection.reconnect_deadline()
    }

    pub fn connection(&self) -> &ConnectionMachine {
        &self.connection
    }

    /// Returns `false` when the open was rejected (the machine was not
    /// connecting) and the caller should close the socket.
    pub fn on_open(&mut self) -> bool {
        let now = self.now();
        let transition = self.connection.on_open(now);
        let accepted = transition.is_some();
        self.notify_transition(transition);
        accepted
    }

    pub fn on_close(&mut self, reason: &str) {
        let now = self.now();
        let transition = self.connection.on_close(now, reason);
        self.notify_transition(transition);
    }

    pub fn on_error(&mut self, reason: &str) {
        let now = self.now();
        let transition = self.connection.on_error(now, reason);
        self.notify_transition(transition);
    }

    pub fn disconnect(&mut self) {
        let transition = self.connection.disconnect();
        self.notify_transition(transition);
    }

    pub fn reconnect(&mut self) {
        let transition = self.connection.reconnect();
        self.notify_transition(transition);
    }

    /// Fire the reconnect timer if due. Returns `true` when the machine moved
    /// to `Connecting` and the driver should dial.
    pub fn poll_reconnect(&mut self) -> bool {
        let now = self.now();
        let transition = self.connection.poll_reconnect(now);
        let fired = transition.is_some();
        self.notify_transition(transition);
        fired
    }

    /// Periodic maintenance: age out pending sends, fire a due reconnect.
    pub fn tick(&mut self) -> bool {
        let now = self.now();
        self.pending.evict_stale(now, self.config.pending_max_age_ms);
        self.poll_reconnect()
    }

    // ---- traffic ----

    /// Validate and record an outbound message, returning the frame to write.
    ///
    /// Rejected synchronously when the connection is not open; nothing is
    /// queued for later.
    pub fn send(&mut self, text: &str) -> Result<OutboundFrame, PanelError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(PanelError::EmptyMessage);
        }
        if !self.connection.can_send() {
            warn!(state = %self.connection.state(), "Send rejected; not connected");
            return Err(PanelError::NotConnected);
        }

        let now = self.now();
        self.pending.evict_stale(now, self.config.pending_max_age_ms);

        let frame = match self.config.correlation {
            CorrelationMode::Text => {
                self.pending.record_send(message, now);
                OutboundFrame::new(message)
            }
            CorrelationMode::Tagged => {
                let id = uuid::Uuid::new_v4().to_string();
                self.pending.record_tagged_send(message, &id, now);
                OutboundFrame::tagged(message, id)
            }
        };
        self.sent_events += 1;

        info!(text = message, pending = self.pending.len(), "📤 Event sent");
        self.publish(PanelUpdate::MessageSent {
            message: frame.message.clone(),
            correlation_id: frame.correlation_id.clone(),
            sent_at: now,
        });

        Ok(frame)
    }

    /// Undo a send whose frame never reached the socket: its pending entry
    /// is withdrawn and it no longer counts as sent.
    pub fn abandon_send(&mut self, frame: &OutboundFrame) {
        let withdrawn = self
            .pending
            .remove_send(&frame.message, frame.correlation_id.as_deref());
        self.sent_events = self.sent_events.saturating_sub(1);
        warn!(
            text = %frame.message,
            withdrawn,
            "Send abandoned before reaching the socket"
        );
    }

    /// Process one inbound text frame.
    ///
    /// Malformed frames and server errors are logged and returned as errors;
    /// neither mutates the store.
    pub fn handle_text(&mut self, text: &str) -> Result<Event, PanelError> {
        match decode_inbound(text) {
            Ok(InboundFrame::Event(msg)) => Ok(self.ingest(msg)),
            Ok(InboundFrame::ServerError(reason)) => {
                warn!(error = %reason, "❌ Server reported an error");
                self.publish(PanelUpdate::ServerError(reason.clone()));
                Err(PanelError::Server(reason))
            }
            Err(e) => {
                if tracing::enabled!(tracing::Level::WARN) {
                    let preview = text
                        .char_indices()
                        .nth(200)
                        .map_or(text, |(idx, _)| &text[..idx]);
                    warn!(error = %e, raw = preview, "Dropping malformed frame");
                }
                Err(e)
            }
        }
    }

    fn ingest(&mut self, msg: InboundMessage) -> Event {
        let received_at = self.now();

        // Correlate against the table as it is right now.
        let latency_ms = match msg.correlation_id.as_deref() {
            Some(id) => self.pending.try_consume_tagged(id, received_at),
            None => self.pending.try_consume(&msg.message, received_at),
        };

        let source_time_ms = msg.source_time_ms();
        let event = self.store.append(Receipt {
            message: msg.message,
            source_timestamp: msg.timestamp,
            source_time_ms,
            received_at,
            latency_ms,
        });

        debug!(
            sequence_id = event.sequence_id,
            latency_ms = ?event.latency_ms,
            "📥 Event received"
        );
        self.publish(PanelUpdate::EventReceived(event.clone()));

        if let Some(latency) = latency_ms {
            let sample = self.series.append(received_at, latency);
            self.publish(PanelUpdate::LatencySampled(sample));
        }

        event
    }

    // ---- queries ----

    pub fn metrics(&self) -> Metrics {
        compute_metrics(
            &self.store,
            self.connection.connected_at(),
            self.now(),
            self.config.rate_window_ms,
        )
    }

    pub fn latency_snapshot(&self) -> Vec<LatencySample> {
        self.series.snapshot()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> + Clone + '_ {
        self.store.iter()
    }

    pub fn sent_events(&self) -> u64 {
        self.sent_events
    }

    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            state: self.connection.state(),
            metrics: self.metrics(),
            sent_events: self.sent_events,
            pending_sends: self.pending.len(),
            reconnect_attempts: self.connection.reconnect_attempts(),
            latency: self.series.snapshot(),
        }
    }

    /// Publish the current metrics to subscribers (refresh timer).
    pub fn refresh(&self) -> Metrics {
        let metrics = self.metrics();
        self.publish(PanelUpdate::MetricsRefreshed(metrics.clone()));
        metrics
    }

    // ---- housekeeping ----

    /// Clear received events and the sent counter. The latency series is
    /// kept so the chart does not go blank.
    pub fn clear_events(&mut self) {
        self.store.clear();
        self.sent_events = 0;
        info!("🧹 Events cleared");
        self.publish(PanelUpdate::Cleared);
    }

    /// Clear everything the engine accumulated. Connection state is kept.
    pub fn reset(&mut self) {
        self.store.clear();
        self.series.clear();
        self.pending.clear();
        self.sent_events = 0;
        info!("🧹 Panel reset");
        self.publish(PanelUpdate::Cleared);
    }

    fn notify_transition(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            self.publish(PanelUpdate::StateChanged { from, to });
        }
    }

    fn publish(&self, update: PanelUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}
