//! Event Panel - headless live event dashboard
//!
//! Connects to an event server over WebSocket, measures round-trip latency of
//! locally sent messages and logs a rolling metrics summary.
//!
//! Usage:
//!   event-panel --url ws://localhost:8000/ws/events
//!
//! Stdin: plain text lines are sent as messages. Commands:
//!   /disconnect  /reconnect  /clear  /stats  /quit
//!
//! Environment:
//!   EVENT_PANEL_URL - WebSocket endpoint
//!   EVENT_PANEL_CONFIG - TOML config path (default: event_panel.toml)
//!   RUST_LOG - log filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_panel::clock::format_timestamp_ms;
use event_panel::{Metrics, PanelClient, PanelConfig, PanelHandle, PanelUpdate, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "event-panel")]
#[command(about = "Live event dashboard with round-trip latency tracking")]
struct Args {
    /// WebSocket endpoint of the event server
    #[arg(long, env = "EVENT_PANEL_URL")]
    url: Option<String>,

    /// TOML config file
    #[arg(long, env = "EVENT_PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Delay before an automatic reconnect
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Metrics refresh cadence
    #[arg(long)]
    refresh_ms: Option<u64>,
}

enum Command<'a> {
    Send(&'a str),
    Disconnect,
    Reconnect,
    Clear,
    Stats,
    Quit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    match line.trim() {
        "/disconnect" => Command::Disconnect,
        "/reconnect" => Command::Reconnect,
        "/clear" => Command::Clear,
        "/stats" => Command::Stats,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other),
        other => Command::Send(other),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(args: &Args) -> Result<PanelConfig> {
    let mut config = match &args.config {
        Some(path) => PanelConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PanelConfig::from_env(),
    };

    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(ms) = args.reconnect_delay_ms {
        config.reconnect_delay_ms = ms;
    }
    if let Some(ms) = args.refresh_ms {
        config.refresh_interval_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

fn summary_line(metrics: &Metrics, sent: u64) -> String {
    format!(
        "events={} sent={} rate={}/min latency avg={}ms min={}ms max={}ms matched={} uptime={} last={}",
        metrics.total_events,
        sent,
        metrics.events_per_minute,
        metrics.average_latency,
        metrics.min_latency,
        metrics.max_latency,
        metrics.matched_events,
        metrics.uptime_display(),
        metrics
            .last_event_time
            .map_or_else(|| "-".to_string(), format_timestamp_ms),
    )
}

/// Log panel updates. Refresh lines are only emitted when something other
/// than uptime moved.
async fn render_updates(handle: PanelHandle) {
    let mut rx = handle.subscribe();
    let mut last: Option<Metrics> = None;

    loop {
        match rx.recv().await {
            Ok(PanelUpdate::StateChanged { from, to }) => {
                info!(%from, %to, "Connection state changed");
            }
            Ok(PanelUpdate::EventReceived(event)) => match event.latency_ms {
                Some(latency) => info!(
                    id = event.sequence_id,
                    latency_ms = latency,
                    "📥 {}",
                    event.message
                ),
                None => info!(id = event.sequence_id, "📥 {}", event.message),
            },
            Ok(PanelUpdate::Cleared) => last = None,
            Ok(PanelUpdate::MetricsRefreshed(metrics)) => {
                let changed = last.as_ref().map_or(true, |prev| {
                    Metrics {
                        connection_uptime: metrics.connection_uptime,
                        ..prev.clone()
                    } != metrics
                });
                if changed {
                    let sent = handle.with_panel(|p| p.sent_events());
                    info!("📊 {}", summary_line(&metrics, sent));
                    last = Some(metrics);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Renderer lagged behind panel updates");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("🚀 Starting event panel");
    info!("  URL: {}", config.url);
    info!("  Reconnect delay: {:?}", config.reconnect_delay());
    info!("  Correlation: {:?}", config.correlation);

    let (handle, worker) = PanelClient::spawn(config, Arc::new(SystemClock))?;
    tokio::spawn(render_updates(handle.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let result = match parse_command(&line) {
            Command::Send(text) if text.is_empty() => continue,
            Command::Send(text) => handle.send(text),
            Command::Disconnect => handle.disconnect(),
            Command::Reconnect => handle.reconnect(),
            Command::Clear => {
                handle.clear_events();
                Ok(())
            }
            Command::Stats => {
                let snapshot = handle.snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                Ok(())
            }
            Command::Quit => break,
            Command::Unknown(cmd) => {
                warn!(command = cmd, "Unknown command");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(error = %e, "❌ Command failed");
        }
    }

    info!("👋 Shutting down");
    let _ = handle.shutdown();
    worker.await.context("panel client task")?;
    Ok(())
}
