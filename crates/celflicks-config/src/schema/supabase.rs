//! Supabase project and table configuration types.

use serde::{Deserialize, Serialize};

/// Connection settings for the Supabase project.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    /// Project reference (the `<ref>` in `https://<ref>.supabase.co`).
    pub project_ref: String,
    /// Publishable anon key.
    pub anon_key: String,
    /// Optional user JWT. Usually supplied through `SUPABASE_ACCESS_TOKEN`.
    pub access_token: Option<String>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u32,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u32,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("project_ref", &self.project_ref)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            anon_key: String::new(),
            access_token: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl SupabaseConfig {
    /// Base URL of the project, e.g. `https://abc.supabase.co`.
    pub fn base_url(&self) -> String {
        format!("https://{}.supabase.co", self.project_ref)
    }
}

/// Table names the room layer reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub rooms: String,
    pub participants: String,
    pub profiles: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            rooms: "audio_rooms".into(),
            participants: "audio_room_participants".into(),
            profiles: "profiles".into(),
        }
    }
}
