//! Thin Supabase Realtime client over Phoenix Channels v1 protocol.
//!
//! Handles heartbeats, channel join/leave, presence tracking,
//! `postgres_changes` delivery and auto-reconnect with backoff.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{
    BroadcastConfig, ChangeKind, ChannelConfig, ChannelError, PhoenixMessage, PostgresChangesFilter,
    PresenceConfig, RealtimeConfig, RealtimeEvent, TableChange,
};
