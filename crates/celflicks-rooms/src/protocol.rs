//! Rows exchanged with the persistence layer and the presence payload
//! tracked on each room's channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use celflicks_common::PeerId;

// ---------------------------------------------------------------------------
// Persistence rows
// ---------------------------------------------------------------------------

/// A row of the rooms table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub title: String,
    pub host_id: String,
    pub created_at: DateTime<Utc>,
}

/// Insert body for a new room. Id and timestamp are assigned by the database.
#[derive(Debug, Clone, Serialize)]
pub struct NewRoom {
    pub title: String,
    pub host_id: String,
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A room together with its host's profile, if that could be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDetails {
    pub room: Room,
    pub host: Option<Profile>,
}

/// Best-effort bookkeeping row linking a user to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub room_id: String,
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Presence payload
// ---------------------------------------------------------------------------

/// The record each participant tracks on `room:<room_id>`.
///
/// Speaking state is deliberately absent: it is only ever computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub peer_id: PeerId,
    #[serde(default)]
    pub is_muted: bool,
}

impl PresenceRecord {
    /// Build the local record from the profile cached at join time.
    pub fn for_local(
        user_id: &str,
        fallback_name: &str,
        profile: Option<&Profile>,
        peer_id: &PeerId,
        is_muted: bool,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: profile
                .and_then(|p| p.username.clone())
                .unwrap_or_else(|| fallback_name.to_string()),
            avatar_url: profile.and_then(|p| p.avatar_url.clone()),
            peer_id: peer_id.clone(),
            is_muted,
        }
    }

    /// Decode one presence meta. Phoenix bookkeeping keys such as
    /// `phx_ref` are ignored.
    pub fn from_meta(meta: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(meta.clone()).ok()
    }
}

/// Channel topic for a room's membership presence.
pub fn room_topic(room_id: &str) -> String {
    format!("room:{room_id}")
}
