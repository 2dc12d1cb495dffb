//! Room directory: the list of rooms, kept fresh by the change feed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::membership::{ChangeFeed, FeedSubscription};
use crate::protocol::Room;
use crate::store::RoomStore;

struct Watcher {
    subscription: Option<Box<dyn FeedSubscription>>,
    task: JoinHandle<()>,
}

pub struct RoomDirectory {
    store: Arc<dyn RoomStore>,
    rooms_table: String,
    rooms: watch::Sender<Vec<Room>>,
    // Held across fetch and publish so an older response never lands last.
    refreshing: Mutex<()>,
    watcher: Mutex<Option<Watcher>>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn RoomStore>, rooms_table: impl Into<String>) -> Arc<Self> {
        let (rooms, _) = watch::channel(Vec::new());
        Arc::new(Self {
            store,
            rooms_table: rooms_table.into(),
            rooms,
            refreshing: Mutex::new(()),
            watcher: Mutex::new(None),
        })
    }

    /// Re-fetch the list. On error the last good list stays and is returned.
    pub async fn refresh(&self) -> Vec<Room> {
        let _serial = self.refreshing.lock().await;
        match self.store.list_rooms().await {
            Ok(rooms) => {
                debug!(count = rooms.len(), "Room directory refreshed");
                self.rooms.send_replace(rooms.clone());
                rooms
            }
            Err(e) => {
                warn!(error = %e, "Failed to list rooms, keeping previous list");
                self.rooms.borrow().clone()
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Room> {
        self.rooms.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms.subscribe()
    }

    /// Initial refresh, then refresh on every change to the rooms table.
    /// A feed that cannot be subscribed leaves the directory static.
    pub async fn start(self: &Arc<Self>, feed: &dyn ChangeFeed) {
        self.stop().await;
        self.refresh().await;

        let (tx, mut rx) = mpsc::channel(64);
        let subscription = match feed.subscribe_table(&self.rooms_table, tx).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(table = %self.rooms_table, error = %e, "Room change feed unavailable");
                None
            }
        };

        let directory = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                debug!(kind = ?change.kind, "Rooms table changed");
                directory.refresh().await;
            }
        });
        info!(table = %self.rooms_table, "Room directory started");
        *self.watcher.lock().await = Some(Watcher { subscription, task });
    }

    pub async fn stop(&self) {
        let watcher = self.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            if let Some(sub) = watcher.subscription {
                sub.unsubscribe().await;
            }
            watcher.task.abort();
        }
    }
}
