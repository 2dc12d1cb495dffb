//! Celflicks audio rooms: the room directory, per-room membership over
//! Supabase Realtime presence, the peer-to-peer audio mesh and the
//! speaking detector, tied together by [`AudioRoomSession`].

pub mod audio;
pub mod directory;
pub mod identity;
pub mod membership;
pub mod peer;
pub mod protocol;
pub mod realtime;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use audio::{AudioDevice, AudioError, FrequencyAnalyser, MediaStream, PlaybackSink};
pub use directory::RoomDirectory;
pub use identity::Identity;
pub use membership::{ChannelEvent, Participant, PresenceTracker, RealtimeHub};
pub use peer::{PeerConnectionManager, PeerEndpoint, PeerEvent, PeerNetwork, SignalingError};
pub use protocol::{MembershipRow, PresenceRecord, Profile, Room, RoomDetails};
pub use realtime::{RealtimeClient, RealtimeConfig, RealtimeEvent};
pub use session::{
    AudioRoomSession, Backends, RoomError, RoomEvent, RoomPhase, RoomSnapshot, SessionConfig,
};
pub use store::{RoomStore, StoreError, SupabaseStore};
