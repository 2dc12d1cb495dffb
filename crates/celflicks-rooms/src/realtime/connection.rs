//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::handler::handle_phoenix_message;
use super::types::{
    ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent,
};

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// State for channels that should be (re)joined on reconnect.
#[derive(Clone)]
pub(crate) struct PendingChannel {
    pub(crate) config: ChannelConfig,
    /// Last tracked presence payload, replayed after a rejoin.
    pub(crate) presence_payload: Option<serde_json::Value>,
    /// Ref of the most recent `phx_join`; only its reply means "subscribed".
    pub(crate) join_ref: String,
}

type Channels = Arc<RwLock<HashMap<String, PendingChannel>>>;

fn phoenix_frame(topic: &str, event: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: event.to_string(),
        payload,
        msg_ref: Some(next_ref()),
    }
}

fn presence_track_frame(topic: &str, payload: &serde_json::Value) -> PhoenixMessage {
    phoenix_frame(
        topic,
        "presence",
        serde_json::json!({
            "type": "presence",
            "event": "track",
            "payload": payload
        }),
    )
}

/// Serialize and write one frame. Returns false when the socket is gone.
async fn send_frame<S>(writer: &Arc<Mutex<S>>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => writer.lock().await.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize Phoenix message");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
///
/// Runs until a `Disconnect` command arrives or every client handle is dropped.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    // Channels to rejoin on reconnect.
    let joined_channels: Channels = Arc::new(RwLock::new(HashMap::new()));
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to Supabase Realtime");

        match tokio::time::timeout(
            Duration::from_secs(15),
            tokio_tungstenite::connect_async(&url),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                rejoin_channels(&ws_write, &joined_channels, config.access_token.as_deref())
                    .await;

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));

                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&joined_channels),
                    event_tx.clone(),
                    Arc::clone(&shutdown),
                    config.access_token.clone(),
                ));

                // Process incoming messages.
                let mut read_stream = ws_read;
                while let Some(msg_result) = read_stream.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(phoenix_msg) => {
                                    handle_phoenix_message(
                                        &phoenix_msg,
                                        &joined_channels,
                                        &event_tx,
                                    )
                                    .await;
                                }
                                Err(_) => debug!(text = %text, "Unrecognized message from Supabase"),
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Supabase Realtime closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to Supabase Realtime");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!("WebSocket connection timed out after 15s");
                let _ = event_tx
                    .send(RealtimeEvent::Error(
                        "Connection timed out after 15s".to_string(),
                    ))
                    .await;
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            info!("Realtime connection shut down");
            return;
        }

        // Exponential backoff reconnect.
        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }
}

/// Re-send `phx_join` (and the last presence payload) for every remembered channel.
async fn rejoin_channels<S>(ws_write: &Arc<Mutex<S>>, channels: &Channels, access_token: Option<&str>)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut channels = channels.write().await;
    for (topic, pending) in channels.iter_mut() {
        let msg = phoenix_frame(topic, "phx_join", pending.config.to_join_payload(access_token));
        pending.join_ref = msg.msg_ref.clone().unwrap_or_default();
        if !send_frame(ws_write, &msg).await {
            return;
        }
        if let Some(payload) = &pending.presence_payload {
            debug!(topic = %topic, "Re-tracking presence after reconnect");
            send_frame(ws_write, &presence_track_frame(topic, payload)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let msg = PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(next_ref()),
        };
        if !send_frame(&ws_write, &msg).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    cmd_channels: Channels,
    cmd_event_tx: mpsc::Sender<RealtimeEvent>,
    shutdown: Arc<AtomicBool>,
    access_token: Option<String>,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    loop {
        let Some(cmd) = rx.recv().await else {
            // Every client handle is gone.
            shutdown.store(true, Ordering::SeqCst);
            let _ = cmd_write.lock().await.send(WsMessage::Close(None)).await;
            return;
        };
        match cmd {
            RealtimeCommand::JoinChannel { topic, config } => {
                let msg = phoenix_frame(
                    &topic,
                    "phx_join",
                    config.to_join_payload(access_token.as_deref()),
                );
                // Register before sending so the reply can be matched.
                cmd_channels.write().await.insert(
                    topic,
                    PendingChannel {
                        config,
                        presence_payload: None,
                        join_ref: msg.msg_ref.clone().unwrap_or_default(),
                    },
                );
                send_frame(&cmd_write, &msg).await;
            }
            RealtimeCommand::LeaveChannel { topic } => {
                cmd_channels.write().await.remove(&topic);
                send_frame(&cmd_write, &phoenix_frame(&topic, "phx_leave", serde_json::json!({})))
                    .await;
            }
            RealtimeCommand::PresenceTrack { topic, payload } => {
                send_frame(&cmd_write, &presence_track_frame(&topic, &payload)).await;
                // Store for re-tracking on reconnect.
                if let Some(ch) = cmd_channels.write().await.get_mut(&topic) {
                    ch.presence_payload = Some(payload);
                }
            }
            RealtimeCommand::Disconnect => {
                shutdown.store(true, Ordering::SeqCst);
                let topics: Vec<String> = cmd_channels.write().await.drain().map(|(t, _)| t).collect();
                for topic in topics {
                    send_frame(
                        &cmd_write,
                        &phoenix_frame(&topic, "phx_leave", serde_json::json!({})),
                    )
                    .await;
                }
                let _ = cmd_write.lock().await.send(WsMessage::Close(None)).await;
                let _ = cmd_event_tx.send(RealtimeEvent::Disconnected).await;
                return;
            }
        }
    }
}
