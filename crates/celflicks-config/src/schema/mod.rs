//! Configuration schema types for the Celflicks room client.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with defaults matching the web client's behavior.

mod audio;
mod realtime;
mod supabase;
mod system;

pub use audio::*;
pub use realtime::*;
pub use supabase::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct CelflicksConfig {
    pub supabase: SupabaseConfig,
    pub realtime: RealtimeSettings,
    pub tables: TablesConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

impl CelflicksConfig {
    /// Apply `SUPABASE_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(project_ref) = lookup("SUPABASE_PROJECT_REF") {
            self.supabase.project_ref = project_ref;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY") {
            self.supabase.anon_key = key;
        }
        if let Some(token) = lookup("SUPABASE_ACCESS_TOKEN") {
            self.supabase.access_token = Some(token);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
