use celflicks_common::PeerId;

use crate::protocol::PresenceRecord;

use super::PresenceState;

/// One entry of the locally rendered participant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub peer_id: PeerId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_muted: bool,
    /// Only ever true for the local user.
    pub is_speaking: bool,
}

impl Participant {
    fn from_record(record: &PresenceRecord, is_speaking: bool) -> Self {
        Self {
            user_id: record.user_id.clone(),
            peer_id: record.peer_id.clone(),
            display_name: record.username.clone(),
            avatar_url: record.avatar_url.clone(),
            is_muted: record.is_muted,
            is_speaking: is_speaking && !record.is_muted,
        }
    }
}

/// Rebuild the participant list from the live presence set.
///
/// The local user comes first, built from `local` rather than from the
/// channel so mute changes show before the round-trip. It is synthesized
/// when the channel has not reported it yet. Remote users follow in key
/// order, one entry per key from its first meta.
pub fn rebuild_participants(
    state: &PresenceState,
    local: Option<&PresenceRecord>,
    local_speaking: bool,
) -> Vec<Participant> {
    let mut participants = Vec::with_capacity(state.len() + 1);
    if let Some(me) = local {
        participants.push(Participant::from_record(me, local_speaking));
    }
    for (key, records) in state {
        if local.is_some_and(|me| me.user_id == *key) {
            continue;
        }
        if let Some(first) = records.first() {
            participants.push(Participant::from_record(first, false));
        }
    }
    participants
}
