use std::sync::Arc;

use tokio::task::JoinHandle;

use celflicks_common::PeerId;

use crate::audio::MediaStream;
use crate::membership::{rebuild_participants, Participant, PresenceChannel, PresenceState};
use crate::peer::{PeerConnectionManager, PeerEndpoint};
use crate::protocol::{MembershipRow, PresenceRecord, Profile, RoomDetails};

/// Where a session is in the room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomPhase {
    #[default]
    Idle,
    Joining,
    Active,
    Leaving,
}

/// Point-in-time view of a session for rendering.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    pub phase: RoomPhase,
    pub room: Option<RoomDetails>,
    pub participants: Vec<Participant>,
    pub is_muted: bool,
    pub is_speaking: bool,
    pub local_peer_id: Option<PeerId>,
}

/// Everything a join acquires. Released by a leave in a fixed order.
#[derive(Default)]
pub(crate) struct Held {
    pub(crate) dispatcher: Option<JoinHandle<()>>,
    pub(crate) peers: Option<Arc<PeerConnectionManager>>,
    pub(crate) stream: Option<MediaStream>,
    pub(crate) sampler: Option<JoinHandle<()>>,
    pub(crate) membership: Option<MembershipRow>,
    pub(crate) channel: Option<Arc<dyn PresenceChannel>>,
    pub(crate) endpoint: Option<Arc<dyn PeerEndpoint>>,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) phase: RoomPhase,
    /// Bumped by every join and leave. Work tagged with an older value
    /// belongs to a superseded attempt.
    pub(crate) attempt: u64,
    pub(crate) room: Option<RoomDetails>,
    /// Local profile, fetched once per join.
    pub(crate) profile: Option<Profile>,
    pub(crate) held: Held,
    pub(crate) presence: PresenceState,
    pub(crate) local_record: Option<PresenceRecord>,
    pub(crate) participants: Vec<Participant>,
    pub(crate) is_muted: bool,
    pub(crate) is_speaking: bool,
}

impl SessionState {
    pub(crate) fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && matches!(self.phase, RoomPhase::Joining | RoomPhase::Active)
    }

    /// Recompute the participant list from the live presence set.
    pub(crate) fn rebuild(&mut self) {
        self.participants = rebuild_participants(
            &self.presence,
            self.local_record.as_ref(),
            self.is_speaking,
        );
    }

    /// Forget the room. `attempt` is kept so stale work stays stale.
    pub(crate) fn reset(&mut self) {
        let attempt = self.attempt;
        *self = Self {
            attempt,
            ..Self::default()
        };
    }

    pub(crate) fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            phase: self.phase,
            room: self.room.clone(),
            participants: self.participants.clone(),
            is_muted: self.is_muted,
            is_speaking: self.is_speaking,
            local_peer_id: self.held.endpoint.as_ref().map(|e| e.id().clone()),
        }
    }
}
