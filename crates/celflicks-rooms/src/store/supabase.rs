//! `RoomStore` over Supabase PostgREST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tracing::debug;

use celflicks_config::schema::{SupabaseConfig, TablesConfig};

use crate::protocol::{MembershipRow, NewRoom, Profile, Room};

use super::{RoomStore, StoreError};

/// PostgREST client for the room tables.
pub struct SupabaseStore {
    http: reqwest::Client,
    base_url: String,
    tables: TablesConfig,
    headers: HeaderMap,
}

impl SupabaseStore {
    pub fn new(
        supabase: &SupabaseConfig,
        tables: TablesConfig,
        access_token: Option<&str>,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(supabase.connect_timeout_secs)))
            .timeout(Duration::from_secs(u64::from(supabase.request_timeout_secs)))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: supabase.base_url(),
            tables,
            headers: auth_headers(&supabase.anon_key, access_token)?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        debug!(table, "PostgREST select");
        let response = self
            .http
            .get(self.table_url(table))
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }
}

/// `apikey` always carries the anon key; `Authorization` carries the user's
/// JWT when there is one so row-level security applies to them.
fn auth_headers(anon_key: &str, access_token: Option<&str>) -> Result<HeaderMap, StoreError> {
    let header = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| StoreError::Parse(format!("invalid header: {e}")))
    };
    let mut headers = HeaderMap::new();
    headers.insert("apikey", header(anon_key)?);
    headers.insert(
        AUTHORIZATION,
        header(&format!("Bearer {}", access_token.unwrap_or(anon_key)))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        message: text.chars().take(200).collect(),
    })
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RoomStore for SupabaseStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.get_rows(
            &self.tables.rooms,
            &[("select", "*".into()), ("order", "created_at.desc".into())],
        )
        .await
    }

    async fn insert_room(&self, room: &NewRoom) -> Result<Room, StoreError> {
        debug!(table = %self.tables.rooms, host_id = %room.host_id, "PostgREST insert");
        let response = self
            .http
            .post(self.table_url(&self.tables.rooms))
            .headers(self.headers.clone())
            .header("Prefer", "return=representation")
            .json(room)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let rows: Vec<Room> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Parse("insert returned no row".into()))
    }

    async fn fetch_room(&self, room_id: &str) -> Result<Room, StoreError> {
        let rows: Vec<Room> = self
            .get_rows(&self.tables.rooms, &[("select", "*".into()), ("id", eq(room_id))])
            .await?;
        rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            table: self.tables.rooms.clone(),
            id: room_id.to_string(),
        })
    }

    async fn insert_membership(&self, row: &MembershipRow) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.table_url(&self.tables.participants))
            .headers(self.headers.clone())
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    async fn delete_membership(&self, row: &MembershipRow) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.table_url(&self.tables.participants))
            .headers(self.headers.clone())
            .query(&[("room_id", eq(&row.room_id)), ("user_id", eq(&row.user_id))])
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        check_status(response).await.map(|_| ())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let rows: Vec<Profile> = self
            .get_rows(
                &self.tables.profiles,
                &[("select", "id,username,avatar_url".into()), ("id", eq(user_id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
