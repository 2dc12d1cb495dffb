//! Presence and change-feed services over one Supabase Realtime connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::PresenceRecord;
use crate::realtime::{
    ChannelConfig, ChannelError, PostgresChangesFilter, PresenceConfig, RealtimeClient,
    RealtimeConfig, RealtimeEvent, TableChange,
};

use super::{
    ChangeFeed, ChannelEvent, FeedSubscription, PresenceChannel, PresenceService, PresenceTracker,
};

// ---------------------------------------------------------------------------
// Routing table
// ---------------------------------------------------------------------------

type Ack = oneshot::Sender<Result<(), String>>;
type Routes = Arc<Mutex<HashMap<String, Route>>>;

struct Route {
    target: Target,
    /// Resolved by the first join reply.
    ack: Option<Ack>,
}

enum Target {
    Presence {
        tracker: PresenceTracker,
        events: mpsc::Sender<ChannelEvent>,
    },
    Feed {
        table: String,
        changes: mpsc::Sender<TableChange>,
    },
}

enum Delivery {
    Presence(mpsc::Sender<ChannelEvent>, Vec<ChannelEvent>),
    Change(mpsc::Sender<TableChange>, TableChange),
}

/// Dispatch realtime events to per-topic subscribers. Sends happen after
/// the routing lock is released so a slow subscriber cannot block
/// unsubscribes.
async fn route_events(mut rx: mpsc::Receiver<RealtimeEvent>, routes: Routes) {
    while let Some(event) = rx.recv().await {
        let delivery = {
            let mut routes = routes.lock().await;
            match event {
                RealtimeEvent::Connected => {
                    info!("Realtime connected");
                    None
                }
                RealtimeEvent::Disconnected => {
                    warn!("Realtime disconnected");
                    None
                }
                RealtimeEvent::Error(message) => {
                    warn!(error = %message, "Realtime error");
                    None
                }
                RealtimeEvent::ChannelJoined { topic } => {
                    routes.get_mut(&topic).and_then(|route| {
                        if let Some(ack) = route.ack.take() {
                            let _ = ack.send(Ok(()));
                        }
                        match &route.target {
                            Target::Presence { events, .. } => Some(Delivery::Presence(
                                events.clone(),
                                vec![ChannelEvent::Subscribed],
                            )),
                            Target::Feed { .. } => None,
                        }
                    })
                }
                RealtimeEvent::ChannelError { topic, message } => {
                    routes.get_mut(&topic).and_then(|route| {
                        if let Some(ack) = route.ack.take() {
                            let _ = ack.send(Err(message));
                            return None;
                        }
                        match &route.target {
                            Target::Presence { events, .. } => Some(Delivery::Presence(
                                events.clone(),
                                vec![ChannelEvent::Error(message)],
                            )),
                            Target::Feed { table, .. } => {
                                warn!(table = %table, error = %message, "Change feed channel error");
                                None
                            }
                        }
                    })
                }
                RealtimeEvent::PresenceState { topic, state } => {
                    match routes.get_mut(&topic).map(|r| &mut r.target) {
                        Some(Target::Presence { tracker, events }) => {
                            Some(Delivery::Presence(events.clone(), tracker.apply_state(state)))
                        }
                        _ => None,
                    }
                }
                RealtimeEvent::PresenceDiff {
                    topic,
                    joins,
                    leaves,
                } => match routes.get_mut(&topic).map(|r| &mut r.target) {
                    Some(Target::Presence { tracker, events }) => Some(Delivery::Presence(
                        events.clone(),
                        tracker.apply_diff(joins, leaves),
                    )),
                    _ => None,
                },
                RealtimeEvent::PostgresChange { topic, change } => {
                    match routes.get(&topic).map(|r| &r.target) {
                        Some(Target::Feed { table, changes }) if *table == change.table => {
                            Some(Delivery::Change(changes.clone(), change))
                        }
                        _ => None,
                    }
                }
            }
        };

        match delivery {
            Some(Delivery::Presence(tx, events)) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Some(Delivery::Change(tx, change)) => {
                let _ = tx.send(change).await;
            }
            None => {}
        }
    }
    debug!("Realtime event stream ended");
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Realtime-backed [`PresenceService`] and [`ChangeFeed`].
pub struct RealtimeHub {
    client: RealtimeClient,
    routes: Routes,
    subscribe_timeout: Duration,
    router: JoinHandle<()>,
}

impl RealtimeHub {
    /// Open the realtime connection and start routing its events.
    pub fn connect(config: RealtimeConfig, subscribe_timeout: Duration) -> Self {
        let (client, rt_events) = RealtimeClient::connect(config);
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let router = tokio::spawn(route_events(rt_events, Arc::clone(&routes)));
        Self {
            client,
            routes,
            subscribe_timeout,
            router,
        }
    }

    /// Leave every channel and close the connection.
    pub async fn disconnect(&self) {
        self.routes.lock().await.clear();
        self.client.disconnect().await;
        self.router.abort();
    }

    async fn join(&self, topic: &str, config: ChannelConfig, target: Target) -> Result<(), ChannelError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.routes.lock().await.insert(
            topic.to_string(),
            Route {
                target,
                ack: Some(ack_tx),
            },
        );

        if let Err(e) = self.client.join_channel(topic, config).await {
            self.routes.lock().await.remove(topic);
            return Err(e);
        }

        let error = match tokio::time::timeout(self.subscribe_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(topic, "Subscription active");
                return Ok(());
            }
            Ok(Ok(Err(message))) => ChannelError::Rejected {
                topic: topic.to_string(),
                message,
            },
            Ok(Err(_)) => ChannelError::Closed,
            Err(_) => ChannelError::Timeout {
                topic: topic.to_string(),
            },
        };
        warn!(topic, error = %error, "Subscription failed");
        self.routes.lock().await.remove(topic);
        let _ = self.client.leave_channel(topic).await;
        Err(error)
    }
}

#[async_trait]
impl PresenceService for RealtimeHub {
    async fn subscribe(
        &self,
        topic: &str,
        presence_key: &str,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<Box<dyn PresenceChannel>, ChannelError> {
        let config = ChannelConfig {
            presence: PresenceConfig {
                key: presence_key.to_string(),
            },
            ..Default::default()
        };
        let target = Target::Presence {
            tracker: PresenceTracker::new(),
            events,
        };
        self.join(topic, config, target).await?;
        Ok(Box::new(HubChannel {
            topic: topic.to_string(),
            client: self.client.clone_sender(),
            routes: Arc::clone(&self.routes),
        }))
    }
}

#[async_trait]
impl ChangeFeed for RealtimeHub {
    async fn subscribe_table(
        &self,
        table: &str,
        changes: mpsc::Sender<TableChange>,
    ) -> Result<Box<dyn FeedSubscription>, ChannelError> {
        let topic = format!("changes:{table}");
        let config = ChannelConfig {
            postgres_changes: vec![PostgresChangesFilter::all(table)],
            ..Default::default()
        };
        let target = Target::Feed {
            table: table.to_string(),
            changes,
        };
        self.join(&topic, config, target).await?;
        Ok(Box::new(HubChannel {
            topic,
            client: self.client.clone_sender(),
            routes: Arc::clone(&self.routes),
        }))
    }
}

/// Handle for one hub topic.
struct HubChannel {
    topic: String,
    client: RealtimeClient,
    routes: Routes,
}

impl HubChannel {
    async fn leave(&self) {
        self.routes.lock().await.remove(&self.topic);
        if let Err(e) = self.client.leave_channel(&self.topic).await {
            debug!(topic = %self.topic, error = %e, "Leave after connection closed");
        }
    }
}

#[async_trait]
impl PresenceChannel for HubChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn track(&self, record: &PresenceRecord) -> Result<(), ChannelError> {
        let payload = serde_json::to_value(record).map_err(|e| ChannelError::Rejected {
            topic: self.topic.clone(),
            message: e.to_string(),
        })?;
        self.client.presence_track(&self.topic, payload).await
    }

    async fn unsubscribe(&self) {
        self.leave().await;
    }
}

#[async_trait]
impl FeedSubscription for HubChannel {
    async fn unsubscribe(&self) {
        self.leave().await;
    }
}
