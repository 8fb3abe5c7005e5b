//! Transport driver against a local WebSocket echo server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use event_panel::{
    ConnectionState, PanelClient, PanelConfig, PanelError, PanelHandle, SystemClock,
};

/// Echo server replying the way the event server broadcasts:
/// `{"message", "timestamp", "correlation_id"?}`. The first `drop_first`
/// connections are closed right after the handshake.
async fn start_server(drop_first: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                if n < drop_first {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    let inbound: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(_) => {
                            let err = serde_json::json!({ "error": "invalid json" });
                            let _ = ws.send(Message::Text(err.to_string())).await;
                            continue;
                        }
                    };
                    let mut reply = serde_json::json!({
                        "message": inbound["message"],
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    });
                    if let Some(id) = inbound.get("correlation_id") {
                        reply["correlation_id"] = id.clone();
                    }
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/ws/events"), accepted)
}

fn config(url: String) -> PanelConfig {
    PanelConfig {
        url,
        reconnect_delay_ms: 100,
        connect_timeout_ms: 2_000,
        refresh_interval_ms: 50,
        ..PanelConfig::default()
    }
}

async fn wait_for(handle: &PanelHandle, what: &str, cond: impl Fn(&PanelHandle) -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond(handle) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_echo_produces_latency_sample() {
    let (url, _) = start_server(0).await;
    let (handle, worker) = PanelClient::spawn(config(url), Arc::new(SystemClock)).unwrap();

    wait_for(&handle, "connect", |h| h.state() == ConnectionState::Connected).await;
    handle.send("ping-1").unwrap();
    wait_for(&handle, "echo", |h| h.metrics().total_events == 1).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.sent_events, 1);
    assert_eq!(snapshot.pending_sends, 0);
    assert_eq!(snapshot.metrics.matched_events, 1);
    assert_eq!(snapshot.latency.len(), 1);
    assert!(snapshot.latency[0].latency_ms < 5_000);

    handle.shutdown().unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.send("late"), Err(PanelError::NotConnected));
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let (url, accepted) = start_server(1).await;
    let (handle, worker) = PanelClient::spawn(config(url), Arc::new(SystemClock)).unwrap();

    wait_for(&handle, "reconnect", |h| {
        let snapshot = h.snapshot();
        snapshot.state == ConnectionState::Connected && snapshot.reconnect_attempts >= 1
    })
    .await;
    assert!(accepted.load(Ordering::SeqCst) >= 2);

    handle.send("after reconnect").unwrap();
    wait_for(&handle, "echo", |h| h.metrics().matched_events == 1).await;

    handle.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
}

#[tokio::test]
async fn test_manual_disconnect_suppresses_reconnect() {
    let (url, accepted) = start_server(0).await;
    let (handle, worker) = PanelClient::spawn(config(url), Arc::new(SystemClock)).unwrap();

    wait_for(&handle, "connect", |h| h.state() == ConnectionState::Connected).await;
    handle.disconnect().unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(handle.send("nope"), Err(PanelError::NotConnected));

    // Several reconnect delays pass without a new dial.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    handle.reconnect().unwrap();
    wait_for(&handle, "manual reconnect", |h| {
        h.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    handle.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
}

#[tokio::test]
async fn test_unreachable_server_keeps_retrying() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (handle, worker) =
        PanelClient::spawn(config(format!("ws://{addr}/ws/events")), Arc::new(SystemClock))
            .unwrap();

    wait_for(&handle, "retries", |h| h.snapshot().reconnect_attempts >= 2).await;
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert_eq!(handle.metrics().connection_uptime, 0);

    handle.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
}

#[tokio::test]
async fn test_burst_beyond_queue_counts_only_queued_sends() {
    let (url, _) = start_server(0).await;
    let (handle, worker) = PanelClient::spawn(config(url), Arc::new(SystemClock)).unwrap();
    wait_for(&handle, "connect", |h| h.state() == ConnectionState::Connected).await;

    // current_thread runtime: the worker cannot drain while this loop runs.
    let mut accepted = 0u64;
    let mut rejected = 0u64;
    for i in 0..1_100 {
        match handle.send(&format!("burst-{i}")) {
            Ok(()) => accepted += 1,
            Err(PanelError::Transport(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(rejected > 0);
    assert_eq!(accepted + rejected, 1_100);

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.sent_events, accepted);
    assert_eq!(snapshot.pending_sends as u64, accepted);

    // The queue is still full; retry until the worker has drained it.
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        while handle.shutdown().is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok());
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
}

#[tokio::test]
async fn test_disconnect_then_reconnect_redials_immediately() {
    let (url, accepted) = start_server(0).await;
    let slow_retry = PanelConfig {
        reconnect_delay_ms: 60_000,
        ..config(url)
    };
    let (handle, worker) = PanelClient::spawn(slow_retry, Arc::new(SystemClock)).unwrap();
    wait_for(&handle, "connect", |h| h.state() == ConnectionState::Connected).await;

    // Both requests land before the worker sees the disconnect.
    handle.disconnect().unwrap();
    handle.reconnect().unwrap();
    assert_eq!(handle.state(), ConnectionState::Connecting);

    wait_for(&handle, "redial", |h| {
        h.state() == ConnectionState::Connected && accepted.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(handle.with_panel(|p| p.reconnect_deadline()), None);

    handle.shutdown().unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
}
