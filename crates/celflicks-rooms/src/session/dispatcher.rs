//! The single consumer of a joined room's inbound queues.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use celflicks_common::EventBus;

use crate::membership::{ChannelEvent, PresenceState};
use crate::peer::{PeerConnectionManager, PeerEvent};

use super::state::SessionState;
use super::RoomEvent;

pub(crate) struct Dispatcher {
    pub(crate) attempt: u64,
    pub(crate) room_id: String,
    pub(crate) user_id: String,
    pub(crate) state: Arc<Mutex<SessionState>>,
    pub(crate) peers: Arc<PeerConnectionManager>,
    pub(crate) events: Arc<EventBus<RoomEvent>>,
}

impl Dispatcher {
    /// Runs until every queue is closed or the task is aborted by a leave.
    pub(crate) async fn run(
        self,
        mut channel_rx: mpsc::Receiver<ChannelEvent>,
        mut peer_rx: mpsc::Receiver<PeerEvent>,
        mut speaking_rx: mpsc::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                Some(event) = channel_rx.recv() => self.on_channel_event(event).await,
                Some(event) = peer_rx.recv() => self.peers.handle_event(event).await,
                Some(speaking) = speaking_rx.recv() => self.on_speaking(speaking).await,
                else => break,
            }
        }
        debug!(room_id = %self.room_id, "Room dispatcher finished");
    }

    async fn on_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Subscribed => {
                info!(room_id = %self.room_id, "Presence subscription active");
            }
            ChannelEvent::Sync(state) => self.replace_presence(state).await,
            ChannelEvent::Join(records) => {
                for record in records {
                    if record.user_id == self.user_id || &record.peer_id == self.peers.local_peer_id() {
                        continue;
                    }
                    debug!(room_id = %self.room_id, user_id = %record.user_id, peer = %record.peer_id, "Participant joined");
                    self.peers.connect(&record.peer_id).await;
                }
            }
            ChannelEvent::Leave { left, current } => {
                self.replace_presence(current.clone()).await;
                for record in left {
                    let still_here = current
                        .values()
                        .flatten()
                        .any(|r| r.peer_id == record.peer_id);
                    if still_here || record.user_id == self.user_id {
                        continue;
                    }
                    info!(room_id = %self.room_id, user_id = %record.user_id, "Participant left");
                    self.peers.disconnect(&record.peer_id).await;
                }
            }
            ChannelEvent::Error(message) => {
                warn!(room_id = %self.room_id, error = %message, "Presence channel error");
            }
        }
    }

    /// Adopt `presence` as the live set and rebuild the participant list.
    async fn replace_presence(&self, presence: PresenceState) {
        let participants = {
            let mut st = self.state.lock().await;
            if !st.is_current(self.attempt) {
                return;
            }
            st.presence = presence;
            st.rebuild();
            st.participants.clone()
        };
        self.events.publish(RoomEvent::ParticipantsChanged(participants));
    }

    async fn on_speaking(&self, speaking: bool) {
        let (speaking, participants) = {
            let mut st = self.state.lock().await;
            if !st.is_current(self.attempt) {
                return;
            }
            let speaking = speaking && !st.is_muted;
            if st.is_speaking == speaking {
                return;
            }
            st.is_speaking = speaking;
            st.rebuild();
            (speaking, st.participants.clone())
        };
        self.events.publish(RoomEvent::SpeakingChanged(speaking));
        self.events.publish(RoomEvent::ParticipantsChanged(participants));
    }
}
