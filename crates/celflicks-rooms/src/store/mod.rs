//! Persistence seam: room rows, membership bookkeeping and profiles.

mod supabase;

pub use supabase::SupabaseStore;

use async_trait::async_trait;

use celflicks_common::CelflicksError;

use crate::protocol::{MembershipRow, NewRoom, Profile, Room};

/// Errors from the persistence layer.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no row {id} in {table}")]
    NotFound { table: String, id: String },
}

impl From<StoreError> for CelflicksError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Network(message) => CelflicksError::Network(message),
            other => CelflicksError::Rooms(other.to_string()),
        }
    }
}

/// Row-level access to the tables the room layer reads and writes.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// All rooms, newest first.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Insert a room and return the stored row.
    async fn insert_room(&self, room: &NewRoom) -> Result<Room, StoreError>;

    async fn fetch_room(&self, room_id: &str) -> Result<Room, StoreError>;

    async fn insert_membership(&self, row: &MembershipRow) -> Result<(), StoreError>;

    async fn delete_membership(&self, row: &MembershipRow) -> Result<(), StoreError>;

    /// `Ok(None)` when the user has no profile row.
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;
}
