//! Presence-based room membership and the table change feed.
//!
//! Presence deltas say *when* to react (call a new peer, drop a departed
//! one); the full state carried by `Sync` and `Leave` says *what* is true.
//! Participant lists are always rebuilt from that state.

mod hub;
mod participants;
mod tracker;

pub use hub::RealtimeHub;
pub use participants::{rebuild_participants, Participant};
pub use tracker::PresenceTracker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::PresenceRecord;
use crate::realtime::{ChannelError, TableChange};

/// Live member set: presence key (user id) to its records.
pub type PresenceState = BTreeMap<String, Vec<PresenceRecord>>;

/// Events of one presence subscription.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The subscription became active, initially or after a reconnect.
    Subscribed,
    /// Full authoritative state.
    Sync(PresenceState),
    /// Newly announced records.
    Join(Vec<PresenceRecord>),
    /// Records that went away, with the state after their removal.
    Leave {
        left: Vec<PresenceRecord>,
        current: PresenceState,
    },
    /// The channel errored or was closed by the server.
    Error(String),
}

/// Presence pub/sub service.
#[async_trait]
pub trait PresenceService: Send + Sync {
    /// Subscribe to `topic`, keying our own publications by `presence_key`.
    /// Resolves once the subscription is active.
    async fn subscribe(
        &self,
        topic: &str,
        presence_key: &str,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Box<dyn PresenceChannel>, ChannelError>;
}

/// An active presence subscription.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Publish (or replace) our record on the topic.
    async fn track(&self, record: &PresenceRecord) -> Result<(), ChannelError>;

    /// Leave the topic. Subscribers see our record leave.
    async fn unsubscribe(&self);
}

/// Row change notifications for a table.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe_table(
        &self,
        table: &str,
        changes: mpsc::Sender<TableChange>,
    ) -> Result<Box<dyn FeedSubscription>, ChannelError>;
}

#[async_trait]
pub trait FeedSubscription: Send + Sync {
    async fn unsubscribe(&self);
}
