//! WebSocket transport driver.
//!
//! One worker task owns the socket and the refresh timer and feeds every
//! socket/timer event into the shared [`EventPanel`]. [`PanelHandle`] is the
//! cheap, cloneable front door: sends are validated synchronously against the
//! engine and only then handed to the worker for writing.
//!
//! The engine lock is taken per reaction and never held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PanelConfig;
use crate::engine::{ConnectionState, EventPanel, Metrics, PanelSnapshot, PanelUpdate};
use crate::error::PanelError;
use crate::wire::OutboundFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
enum ClientCommand {
    /// Outbound frame already recorded by the engine, plus its encoding.
    Send { frame: OutboundFrame, json: String },
    Disconnect,
    Reconnect,
    Shutdown,
}

/// What the worker does after a socket session ends.
enum SessionEnd {
    Continue,
    Shutdown,
}

pub struct PanelClient;

impl PanelClient {
    /// Spawn the transport worker and return a handle to it.
    ///
    /// The engine starts in `Connecting`, so the worker dials immediately.
    /// Fails without spawning anything if the config does not validate.
    pub fn spawn(
        config: PanelConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(PanelHandle, JoinHandle<()>), PanelError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(COMMAND_CHANNEL_CAPACITY);

        let worker = Worker {
            url: config.url.clone(),
            connect_timeout: config.connect_timeout(),
            refresh_interval: config.refresh_interval(),
            panel: Arc::new(Mutex::new(EventPanel::new(config, clock))),
        };
        let handle = PanelHandle {
            panel: worker.panel.clone(),
            cmd_tx,
        };

        let task = tokio::spawn(async move {
            worker.run(cmd_rx).await;
        });

        Ok((handle, task))
    }
}

#[derive(Clone)]
pub struct PanelHandle {
    panel: Arc<Mutex<EventPanel>>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl PanelHandle {
    /// Send a message. Rejected synchronously when not connected or when
    /// the worker cannot take it; a rejected send leaves no trace in the
    /// engine.
    pub fn send(&self, text: &str) -> Result<(), PanelError> {
        // Queue slot first, so the engine only records sends that get queued.
        let permit = self.cmd_tx.try_reserve().map_err(queue_error)?;
        let mut panel = self.panel.lock();
        let frame = panel.send(text)?;
        match frame.to_json() {
            Ok(json) => {
                permit.send(ClientCommand::Send { frame, json });
                Ok(())
            }
            Err(e) => {
                panel.abandon_send(&frame);
                Err(e)
            }
        }
    }

    /// Deliberately close the connection. No automatic reconnect follows
    /// until [`reconnect`](Self::reconnect) is called.
    pub fn disconnect(&self) -> Result<(), PanelError> {
        self.panel.lock().disconnect();
        self.command(ClientCommand::Disconnect)
    }

    pub fn reconnect(&self) -> Result<(), PanelError> {
        self.panel.lock().reconnect();
        self.command(ClientCommand::Reconnect)
    }

    /// Stop the worker. Closes the socket and cancels both timers.
    pub fn shutdown(&self) -> Result<(), PanelError> {
        self.command(ClientCommand::Shutdown)
    }

    pub fn clear_events(&self) {
        self.panel.lock().clear_events();
    }

    pub fn state(&self) -> ConnectionState {
        self.panel.lock().state()
    }

    pub fn metrics(&self) -> Metrics {
        self.panel.lock().metrics()
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        self.panel.lock().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelUpdate> {
        self.panel.lock().subscribe()
    }

    /// Run a read-only query against the engine under the lock.
    pub fn with_panel<R>(&self, f: impl FnOnce(&EventPanel) -> R) -> R {
        f(&self.panel.lock())
    }

    fn command(&self, cmd: ClientCommand) -> Result<(), PanelError> {
        self.cmd_tx.try_send(cmd).map_err(queue_error)
    }
}

fn queue_error<T>(e: mpsc::error::TrySendError<T>) -> PanelError {
    match e {
        mpsc::error::TrySendError::Full(_) => {
            PanelError::Transport("command queue full".to_string())
        }
        mpsc::error::TrySendError::Closed(_) => PanelError::Shutdown,
    }
}

struct Worker {
    url: String,
    connect_timeout: Duration,
    refresh_interval: Duration,
    panel: Arc<Mutex<EventPanel>>,
}

impl Worker {
    async fn run(self, mut cmd_rx: mpsc::Receiver<ClientCommand>) {
        let mut refresh = interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let state = self.panel.lock().state();
            let keep_running = match state {
                ConnectionState::Connecting => self.connect(&mut cmd_rx, &mut refresh).await,
                ConnectionState::Disconnected => self.idle(&mut cmd_rx, &mut refresh).await,
                ConnectionState::Connected => {
                    // Every session end reports its close; nothing to dial.
                    warn!("Worker found no socket for a connected engine");
                    self.panel.lock().on_error("socket lost");
                    true
                }
            };
            if !keep_running {
                break;
            }
        }

        self.panel.lock().disconnect();
        info!("🛑 Panel client stopped");
    }

    /// Dial once. Returns `false` on shutdown.
    async fn connect(
        &self,
        cmd_rx: &mut mpsc::Receiver<ClientCommand>,
        refresh: &mut Interval,
    ) -> bool {
        info!(url = %self.url, "🔌 Connecting to event server");
        let dial = timeout(self.connect_timeout, connect_async(self.url.as_str()));
        tokio::pin!(dial);

        let outcome = loop {
            tokio::select! {
                res = &mut dial => break res,
                _ = refresh.tick() => self.refresh(),
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(ClientCommand::Shutdown) => return false,
                    Some(ClientCommand::Send { frame, .. }) => self.abandon(&frame),
                    Some(other) => debug!(?other, "Command ignored while connecting"),
                },
            }
        };

        let ws = match outcome {
            Ok(Ok((ws, resp))) => {
                debug!(status = %resp.status(), "WebSocket handshake complete");
                ws
            }
            Ok(Err(e)) => {
                self.panel.lock().on_error(&e.to_string());
                return true;
            }
            Err(_) => {
                let reason = format!("connect timed out after {:?}", self.connect_timeout);
                self.panel.lock().on_error(&reason);
                return true;
            }
        };

        let accepted = self.panel.lock().on_open();
        if !accepted {
            // Disconnected while the handshake was in flight.
            let mut ws = ws;
            let _ = ws.close(None).await;
            return true;
        }

        info!(url = %self.url, "✅ Event server connected");
        matches!(
            self.stream(ws, cmd_rx, refresh).await,
            SessionEnd::Continue
        )
    }

    async fn stream(
        &self,
        ws: WsStream,
        cmd_rx: &mut mpsc::Receiver<ClientCommand>,
        refresh: &mut Interval,
    ) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = refresh.tick() => self.refresh(),
                cmd = cmd_rx.recv() => match cmd {
                    Some(ClientCommand::Send { frame, json }) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            let mut panel = self.panel.lock();
                            panel.abandon_send(&frame);
                            panel.on_error(&e.to_string());
                            return SessionEnd::Continue;
                        }
                    }
                    Some(ClientCommand::Disconnect) => {
                        let _ = write.send(Message::Close(None)).await;
                        // The handle already moved the engine out of Connected.
                        // A reconnect requested since then has it Connecting,
                        // and reporting this close would defer that reconnect
                        // behind the retry delay.
                        let mut panel = self.panel.lock();
                        if panel.state() == ConnectionState::Connected {
                            panel.on_close("closed by client");
                        }
                        return SessionEnd::Continue;
                    }
                    Some(ClientCommand::Reconnect) => {
                        debug!("Already connected; reconnect ignored");
                    }
                    None | Some(ClientCommand::Shutdown) => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        self.panel.lock().on_close("stream ended");
                        return SessionEnd::Continue;
                    };

                    match ws_msg {
                        Ok(Message::Text(text)) => {
                            // Errors are logged by the engine; the stream goes on.
                            let _ = self.panel.lock().handle_text(&text);
                        }
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by server".to_string());
                            self.panel.lock().on_close(&reason);
                            return SessionEnd::Continue;
                        }
                        Ok(Message::Binary(data)) => {
                            warn!(bytes = data.len(), "Ignoring binary frame");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.panel.lock().on_error(&e.to_string());
                            return SessionEnd::Continue;
                        }
                    }
                }
            }
        }
    }

    /// Wait out a disconnect: until the reconnect deadline, a reconnect
    /// request, or shutdown. Returns `false` on shutdown.
    async fn idle(
        &self,
        cmd_rx: &mut mpsc::Receiver<ClientCommand>,
        refresh: &mut Interval,
    ) -> bool {
        loop {
            let (state, wait) = {
                let panel = self.panel.lock();
                let now = panel.now();
                let wait = panel
                    .reconnect_deadline()
                    .map(|deadline| Duration::from_millis((deadline - now).max(0) as u64));
                (panel.state(), wait)
            };
            if state != ConnectionState::Disconnected {
                return true;
            }

            tokio::select! {
                _ = sleep(wait.unwrap_or_default()), if wait.is_some() => {
                    self.panel.lock().poll_reconnect();
                }
                _ = refresh.tick() => self.refresh(),
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(ClientCommand::Shutdown) => return false,
                    Some(ClientCommand::Send { frame, .. }) => self.abandon(&frame),
                    Some(ClientCommand::Reconnect) | Some(ClientCommand::Disconnect) => {}
                },
            }
        }
    }

    /// A frame queued while connected whose socket went away before the
    /// write.
    fn abandon(&self, frame: &OutboundFrame) {
        self.panel.lock().abandon_send(frame);
    }

    fn refresh(&self) {
        let mut panel = self.panel.lock();
        panel.tick();
        panel.refresh();
    }
}
