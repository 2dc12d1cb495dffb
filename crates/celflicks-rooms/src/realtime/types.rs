//! Configuration, protocol types, and event/command enums for the realtime client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use celflicks_config::schema::{RealtimeSettings, SupabaseConfig};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to Supabase Realtime.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Supabase project reference (e.g., "ojmqzagktzkualzgpcbq").
    pub project_ref: String,
    /// Supabase anon key (publishable).
    pub api_key: String,
    /// Optional access token (JWT) sent with every channel join.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            access_token: None,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl RealtimeConfig {
    /// Build from the file-level `[supabase]` and `[realtime]` sections.
    pub fn from_settings(supabase: &SupabaseConfig, realtime: &RealtimeSettings) -> Self {
        Self {
            project_ref: supabase.project_ref.clone(),
            api_key: supabase.anon_key.clone(),
            access_token: supabase.access_token.clone(),
            heartbeat_interval_secs: u64::from(realtime.heartbeat_interval_secs),
            reconnect_delay_secs: u64::from(realtime.reconnect_delay_secs),
            max_reconnect_delay_secs: u64::from(realtime.max_reconnect_delay_secs),
        }
    }

    /// Build the WebSocket URL for Supabase Realtime.
    pub(crate) fn ws_url(&self) -> String {
        format!(
            "wss://{}.supabase.co/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.project_ref, self.api_key
        )
    }
}

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// Configuration for a Supabase Realtime channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    /// Table change subscriptions (`postgres_changes`).
    pub postgres_changes: Vec<PostgresChangesFilter>,
}

/// Broadcast configuration for a channel.
#[derive(Debug, Clone, Default)]
pub struct BroadcastConfig {
    /// Whether to receive your own broadcasts (Supabase "self" key).
    pub self_send: bool,
    /// Whether broadcasts are acknowledged by the server.
    pub ack: bool,
}

/// Presence configuration for a channel.
#[derive(Debug, Clone, Default)]
pub struct PresenceConfig {
    /// The key used to identify this client in presence state.
    pub key: String,
}

/// One `postgres_changes` subscription entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresChangesFilter {
    /// `*`, `INSERT`, `UPDATE` or `DELETE`.
    pub event: String,
    pub schema: String,
    pub table: String,
}

impl PostgresChangesFilter {
    /// Every change on `public.<table>`.
    pub fn all(table: &str) -> Self {
        Self {
            event: "*".into(),
            schema: "public".into(),
            table: table.into(),
        }
    }
}

impl ChannelConfig {
    /// Serialize to the JSON payload expected by Supabase phx_join.
    pub(crate) fn to_join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let changes: Vec<serde_json::Value> = self
            .postgres_changes
            .iter()
            .map(|f| {
                serde_json::json!({
                    "event": f.event,
                    "schema": f.schema,
                    "table": f.table
                })
            })
            .collect();

        let mut payload = serde_json::json!({
            "config": {
                "broadcast": {
                    "self": self.broadcast.self_send,
                    "ack": self.broadcast.ack
                },
                "presence": {
                    "key": self.presence.key
                },
                "postgres_changes": changes
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = serde_json::json!(token);
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Table changes
// ---------------------------------------------------------------------------

/// Kind of row change delivered by `postgres_changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A single row change.
#[derive(Debug, Clone)]
pub struct TableChange {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    pub record: serde_json::Value,
    pub old_record: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the realtime client.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// WebSocket connection established.
    Connected,
    /// WebSocket connection lost.
    Disconnected,
    /// The server acknowledged a channel join.
    ChannelJoined { topic: String },
    /// Channel closed, errored, or a join was refused.
    ChannelError { topic: String, message: String },
    /// Full presence state snapshot (received after joining).
    PresenceState {
        topic: String,
        state: HashMap<String, Vec<serde_json::Value>>,
    },
    /// Incremental presence changes.
    PresenceDiff {
        topic: String,
        joins: HashMap<String, Vec<serde_json::Value>>,
        leaves: HashMap<String, Vec<serde_json::Value>>,
    },
    /// A row changed in a subscribed table.
    PostgresChange { topic: String, change: TableChange },
    /// Error.
    Error(String),
}

/// Commands sent to the realtime client from the application layer.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        topic: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        topic: String,
    },
    PresenceTrack {
        topic: String,
        payload: serde_json::Value,
    },
    Disconnect,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of channel-level operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("realtime connection task has stopped")]
    Closed,
    #[error("subscription to {topic} was not acknowledged in time")]
    Timeout { topic: String },
    #[error("subscription to {topic} failed: {message}")]
    Rejected { topic: String, message: String },
}

impl From<ChannelError> for celflicks_common::CelflicksError {
    fn from(e: ChannelError) -> Self {
        celflicks_common::CelflicksError::Network(e.to_string())
    }
}
