//! Incoming Phoenix message handler and presence parsing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::connection::PendingChannel;
use super::types::{ChangeKind, PhoenixMessage, RealtimeEvent, TableChange};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a Phoenix presence map into `HashMap<key, Vec<meta>>`.
///
/// Supabase sends presence as `{ "key": { "metas": [{ ... }] } }`.
pub(crate) fn parse_presence_map(
    value: &serde_json::Value,
) -> HashMap<String, Vec<serde_json::Value>> {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(metas) = val.get("metas").and_then(|m| m.as_array()) {
                result.insert(key.clone(), metas.clone());
            }
        }
    }
    result
}

/// Parse the `data` object of a `postgres_changes` message.
fn parse_table_change(payload: &serde_json::Value) -> Option<TableChange> {
    let data = payload.get("data")?;
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let text = |field: &str| {
        data.get(field)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Some(TableChange {
        kind,
        schema: text("schema"),
        table: text("table"),
        record: data.get("record").cloned().unwrap_or(serde_json::Value::Null),
        old_record: data
            .get("old_record")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Message Handler
// ---------------------------------------------------------------------------

/// Translate one Phoenix message into a client event.
///
/// `join_ref` is the ref of the outstanding `phx_join` for the message's
/// topic. Replies to anything else (heartbeats, presence acks) are dropped.
pub(crate) fn translate(msg: &PhoenixMessage, join_ref: Option<&str>) -> Option<RealtimeEvent> {
    let topic = strip_topic_prefix(&msg.topic).to_string();

    match msg.event.as_str() {
        "phx_reply" => {
            if join_ref.is_none() || msg.msg_ref.as_deref() != join_ref {
                return None;
            }
            let status = msg.payload.get("status").and_then(|s| s.as_str())?;
            if status == "ok" {
                debug!(topic = %topic, "Channel join acknowledged");
                Some(RealtimeEvent::ChannelJoined { topic })
            } else {
                let message = msg
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                warn!(topic = %topic, status = %status, "Channel join refused");
                Some(RealtimeEvent::ChannelError { topic, message })
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel error".to_string(),
            })
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel closed".to_string(),
            })
        }
        "presence_state" => {
            let state = parse_presence_map(&msg.payload);
            debug!(topic = %topic, users = state.len(), "Presence state received");
            Some(RealtimeEvent::PresenceState { topic, state })
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            debug!(
                topic = %topic,
                joins = joins.len(),
                leaves = leaves.len(),
                "Presence diff received"
            );
            Some(RealtimeEvent::PresenceDiff {
                topic,
                joins,
                leaves,
            })
        }
        "postgres_changes" => match parse_table_change(&msg.payload) {
            Some(change) => {
                debug!(topic = %topic, table = %change.table, kind = ?change.kind, "Table change");
                Some(RealtimeEvent::PostgresChange { topic, change })
            }
            None => {
                debug!(topic = %topic, "Malformed postgres_changes payload");
                None
            }
        },
        _ => {
            debug!(topic = %topic, event = %msg.event, "Unhandled Phoenix event");
            None
        }
    }
}

/// Handle a single incoming Phoenix message.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    joined_channels: &Arc<RwLock<HashMap<String, PendingChannel>>>,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) {
    let join_ref = joined_channels
        .read()
        .await
        .get(strip_topic_prefix(&msg.topic))
        .map(|ch| ch.join_ref.clone());

    if let Some(event) = translate(msg, join_ref.as_deref()) {
        let _ = event_tx.send(event).await;
    }
}
