//! Room lifecycle controller: create, join, leave and mute.
//!
//! One [`AudioRoomSession`] per signed-in client. Joins run their steps in
//! order and record each acquired resource before moving on, so a leave at
//! any point releases exactly what exists. Channel, peer and speaking
//! events for the joined room are consumed by a single dispatcher task.

mod dispatcher;
mod state;

pub use state::{RoomPhase, RoomSnapshot};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use celflicks_common::{CelflicksError, EventBus, PeerId};
use celflicks_config::schema::{AnalyserConfig, CaptureConfig, TablesConfig};
use celflicks_config::CelflicksConfig;

use crate::audio::{spawn_sampler, AudioConstraints, AudioDevice, AudioError, PlaybackSink};
use crate::directory::RoomDirectory;
use crate::identity::Identity;
use crate::membership::{ChangeFeed, Participant, PresenceChannel, PresenceService};
use crate::peer::{PeerConnectionManager, PeerNetwork, SignalingError};
use crate::protocol::{room_topic, MembershipRow, NewRoom, PresenceRecord, Profile, Room, RoomDetails};
use crate::store::{RoomStore, StoreError};

use dispatcher::Dispatcher;
use state::{Held, SessionState};

// ---------------------------------------------------------------------------
// Configuration & collaborators
// ---------------------------------------------------------------------------

/// The parts of [`CelflicksConfig`] a session needs.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub tables: TablesConfig,
    pub capture: CaptureConfig,
    pub analyser: AnalyserConfig,
}

impl SessionConfig {
    pub fn from_config(config: &CelflicksConfig) -> Self {
        Self {
            tables: config.tables.clone(),
            capture: config.audio.capture.clone(),
            analyser: config.audio.analyser.clone(),
        }
    }
}

/// External services a session is wired to.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn RoomStore>,
    pub presence: Arc<dyn PresenceService>,
    pub feed: Arc<dyn ChangeFeed>,
    pub peers: Arc<dyn PeerNetwork>,
    pub audio: Arc<dyn AudioDevice>,
    pub playback: Arc<dyn PlaybackSink>,
}

// ---------------------------------------------------------------------------
// Events & errors
// ---------------------------------------------------------------------------

/// Notifications for whatever renders the session.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    PhaseChanged(RoomPhase),
    ParticipantsChanged(Vec<Participant>),
    SpeakingChanged(bool),
    MuteChanged(bool),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("this device has no audio input")]
    NoAudioInput,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("audio error: {0}")]
    Audio(AudioError),
    #[error("join cancelled by a leave")]
    Cancelled,
}

impl From<AudioError> for RoomError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::NoInput => Self::NoAudioInput,
            AudioError::PermissionDenied => Self::PermissionDenied,
            other => Self::Audio(other),
        }
    }
}

impl From<RoomError> for CelflicksError {
    fn from(e: RoomError) -> Self {
        CelflicksError::Rooms(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct AudioRoomSession {
    identity: Identity,
    config: SessionConfig,
    backends: Backends,
    directory: Arc<RoomDirectory>,
    state: Arc<Mutex<SessionState>>,
    events: Arc<EventBus<RoomEvent>>,
}

impl AudioRoomSession {
    pub fn new(identity: Identity, config: SessionConfig, backends: Backends) -> Self {
        let directory = RoomDirectory::new(Arc::clone(&backends.store), config.tables.rooms.clone());
        Self {
            identity,
            config,
            backends,
            directory,
            state: Arc::new(Mutex::new(SessionState::default())),
            events: Arc::new(EventBus::new(256)),
        }
    }

    /// Load the directory and start following room changes.
    pub async fn init(&self) {
        self.directory.start(self.backends.feed.as_ref()).await;
    }

    /// Leave any room and stop following room changes.
    pub async fn dispose(&self) {
        self.leave_room().await;
        self.directory.stop().await;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Peers with a pending or established connection.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let peers = self.state.lock().await.held.peers.clone();
        match peers {
            Some(peers) => peers.tracked_peers().await,
            None => Vec::new(),
        }
    }

    /// Refresh and return the room list. Never fails: on error the last
    /// good list is returned.
    pub async fn list_rooms(&self) -> Vec<Room> {
        self.directory.refresh().await
    }

    /// Insert a room hosted by the caller, then join it.
    pub async fn create_room(&self, title: &str) -> Result<Room, RoomError> {
        self.require_auth()?;
        let room = self
            .backends
            .store
            .insert_room(&NewRoom {
                title: title.to_string(),
                host_id: self.identity.user_id.clone(),
            })
            .await?;
        info!(room_id = %room.id, user_id = %self.identity.user_id, title, "Room created");

        self.directory.refresh().await;
        self.join_room(&room.id).await?;
        Ok(room)
    }

    /// Join `room_id`, leaving the current room first.
    ///
    /// Returns once the room is active with the microphone muted. On a
    /// fatal error everything acquired is released and the session is
    /// idle again.
    pub async fn join_room(&self, room_id: &str) -> Result<(), RoomError> {
        self.require_auth()?;
        self.leave_room().await;

        let attempt = {
            let mut st = self.state.lock().await;
            st.reset();
            st.attempt += 1;
            st.phase = RoomPhase::Joining;
            st.attempt
        };
        self.events.publish(RoomEvent::PhaseChanged(RoomPhase::Joining));
        info!(room_id, user_id = %self.identity.user_id, "Joining room");

        match self.run_join(attempt, room_id).await {
            Ok(()) => {
                info!(room_id, user_id = %self.identity.user_id, "Joined room");
                Ok(())
            }
            Err(RoomError::Cancelled) => {
                info!(room_id, "Join cancelled");
                Err(RoomError::Cancelled)
            }
            Err(e) => {
                warn!(room_id, error = %e, "Join failed");
                self.shut_down(Some(attempt)).await;
                Err(e)
            }
        }
    }

    /// Leave the current room. Safe at any time, including mid-join.
    pub async fn leave_room(&self) {
        self.shut_down(None).await;
    }

    /// Flip the microphone. Returns the new muted state, or `None` when
    /// there is no local audio to toggle.
    pub async fn toggle_mic(&self) -> Option<bool> {
        let (muted, stopped_speaking, channel, record, participants) = {
            let mut st = self.state.lock().await;
            let stream = st.held.stream.clone()?;
            let muted = stream.is_enabled();
            stream.set_enabled(!muted);
            st.is_muted = muted;
            let stopped_speaking = muted && st.is_speaking;
            if muted {
                st.is_speaking = false;
            }
            if let Some(record) = st.local_record.as_mut() {
                record.is_muted = muted;
            }
            st.rebuild();
            (
                muted,
                stopped_speaking,
                st.held.channel.clone(),
                st.local_record.clone(),
                st.participants.clone(),
            )
        };

        info!(user_id = %self.identity.user_id, muted, "Microphone toggled");
        self.events.publish(RoomEvent::MuteChanged(muted));
        if stopped_speaking {
            self.events.publish(RoomEvent::SpeakingChanged(false));
        }
        self.events.publish(RoomEvent::ParticipantsChanged(participants));

        if let (Some(channel), Some(record)) = (channel, record) {
            if let Err(e) = channel.track(&record).await {
                warn!(error = %e, "Failed to republish presence");
            }
        }
        Some(muted)
    }

    // -----------------------------------------------------------------------
    // Join steps
    // -----------------------------------------------------------------------

    fn require_auth(&self) -> Result<(), RoomError> {
        if self.identity.is_authenticated() {
            Ok(())
        } else {
            Err(RoomError::NotAuthenticated)
        }
    }

    async fn fetch_profile(&self, user_id: &str) -> Option<Profile> {
        match self.backends.store.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id, error = %e, "Profile unavailable");
                None
            }
        }
    }

    async fn run_join(&self, attempt: u64, room_id: &str) -> Result<(), RoomError> {
        let user_id = self.identity.user_id.as_str();

        // 1. Room and display metadata.
        let room = self.backends.store.fetch_room(room_id).await?;
        let host = self.fetch_profile(&room.host_id).await;
        let profile = if room.host_id == user_id {
            host.clone()
        } else {
            self.fetch_profile(user_id).await
        };
        {
            let mut st = self.state.lock().await;
            if !st.is_current(attempt) {
                return Err(RoomError::Cancelled);
            }
            st.room = Some(RoomDetails { room, host });
            st.profile = profile.clone();
        }

        // 2. Microphone, muted until the user opts in.
        if !self.backends.audio.has_input() {
            return Err(RoomError::NoAudioInput);
        }
        let constraints = AudioConstraints::from(&self.config.capture);
        let stream = self.backends.audio.open_microphone(&constraints).await?;
        stream.set_enabled(false);
        let (speaking_tx, speaking_rx) = mpsc::channel(16);
        {
            let mut st = self.state.lock().await;
            if !st.is_current(attempt) {
                drop(st);
                stream.stop();
                return Err(RoomError::Cancelled);
            }
            st.held.sampler = Some(spawn_sampler(stream.clone(), &self.config.analyser, speaking_tx));
            st.held.stream = Some(stream.clone());
            st.is_muted = true;
        }

        // 3. Signaling endpoint.
        let (peer_tx, peer_rx) = mpsc::channel(256);
        let endpoint = self.backends.peers.open(peer_tx).await?;
        let peers = Arc::new(PeerConnectionManager::new(
            Arc::clone(&endpoint),
            stream,
            Arc::clone(&self.backends.playback),
        ));
        {
            let mut st = self.state.lock().await;
            if !st.is_current(attempt) {
                drop(st);
                endpoint.close().await;
                return Err(RoomError::Cancelled);
            }
            st.held.endpoint = Some(Arc::clone(&endpoint));
            st.held.peers = Some(Arc::clone(&peers));
        }
        debug!(room_id, peer = %endpoint.id(), "Peer endpoint open");

        // 4. Membership bookkeeping. Not the source of truth for presence.
        let row = MembershipRow {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        };
        match self.backends.store.insert_membership(&row).await {
            Ok(()) => {
                let mut st = self.state.lock().await;
                if !st.is_current(attempt) {
                    drop(st);
                    let _ = self.backends.store.delete_membership(&row).await;
                    return Err(RoomError::Cancelled);
                }
                st.held.membership = Some(row);
            }
            Err(e) => warn!(room_id, user_id, error = %e, "Membership row not written"),
        }

        // 5. Presence subscription keyed by our user id.
        let (channel_tx, channel_rx) = mpsc::channel(256);
        let topic = room_topic(room_id);
        let channel: Option<Arc<dyn PresenceChannel>> =
            match self.backends.presence.subscribe(&topic, user_id, channel_tx).await {
                Ok(channel) => Some(Arc::from(channel)),
                Err(e) => {
                    warn!(room_id, error = %e, "Presence unavailable, continuing without it");
                    None
                }
            };

        // 6. Announce ourselves. The mic may have been toggled while joining,
        // so the record carries the current track state.
        let record = {
            let mut st = self.state.lock().await;
            if !st.is_current(attempt) {
                drop(st);
                if let Some(channel) = &channel {
                    channel.unsubscribe().await;
                }
                return Err(RoomError::Cancelled);
            }
            let record = PresenceRecord::for_local(
                user_id,
                &self.identity.display_name,
                profile.as_ref(),
                endpoint.id(),
                st.is_muted,
            );
            st.held.channel = channel.clone();
            st.local_record = Some(record.clone());
            st.rebuild();
            record
        };
        if let Some(channel) = &channel {
            if let Err(e) = channel.track(&record).await {
                warn!(room_id, error = %e, "Failed to publish presence");
            }
        }

        // 7. Active.
        let dispatcher = Dispatcher {
            attempt,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            state: Arc::clone(&self.state),
            peers,
            events: Arc::clone(&self.events),
        };
        let participants = {
            let mut st = self.state.lock().await;
            if !st.is_current(attempt) {
                return Err(RoomError::Cancelled);
            }
            st.held.dispatcher = Some(tokio::spawn(dispatcher.run(channel_rx, peer_rx, speaking_rx)));
            st.phase = RoomPhase::Active;
            st.participants.clone()
        };
        self.events.publish(RoomEvent::PhaseChanged(RoomPhase::Active));
        self.events.publish(RoomEvent::ParticipantsChanged(participants));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release everything held. With `only_attempt`, does nothing unless
    /// that join attempt is still the current one.
    async fn shut_down(&self, only_attempt: Option<u64>) {
        let (held, token, room_id) = {
            let mut st = self.state.lock().await;
            match only_attempt {
                Some(attempt) if st.attempt != attempt => return,
                None if matches!(st.phase, RoomPhase::Idle | RoomPhase::Leaving) => return,
                _ => {}
            }
            st.attempt += 1;
            st.phase = RoomPhase::Leaving;
            let room_id = st.room.as_ref().map(|r| r.room.id.clone());
            (std::mem::take(&mut st.held), st.attempt, room_id)
        };
        self.events.publish(RoomEvent::PhaseChanged(RoomPhase::Leaving));
        info!(room_id = ?room_id, user_id = %self.identity.user_id, "Leaving room");

        self.release(held).await;

        let finished = {
            let mut st = self.state.lock().await;
            if st.attempt == token {
                st.reset();
                true
            } else {
                false
            }
        };
        if finished {
            self.events.publish(RoomEvent::PhaseChanged(RoomPhase::Idle));
            self.events.publish(RoomEvent::ParticipantsChanged(Vec::new()));
        }
    }

    /// Teardown in fixed order. No step depends on an earlier one succeeding.
    async fn release(&self, held: Held) {
        if let Some(dispatcher) = held.dispatcher {
            dispatcher.abort();
        }
        if let Some(peers) = &held.peers {
            peers.disconnect_all().await;
        }
        if let Some(stream) = &held.stream {
            stream.stop();
        }
        if let Some(sampler) = held.sampler {
            sampler.abort();
        }
        if let Some(row) = &held.membership {
            if let Err(e) = self.backends.store.delete_membership(row).await {
                warn!(room_id = %row.room_id, error = %e, "Membership row not deleted");
            }
        }
        if let Some(channel) = &held.channel {
            channel.unsubscribe().await;
        }
        if let Some(endpoint) = &held.endpoint {
            endpoint.close().await;
        }
    }
}
