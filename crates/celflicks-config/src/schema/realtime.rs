use serde::{Deserialize, Serialize};

/// Supabase Realtime connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Phoenix heartbeat interval in seconds.
    pub heartbeat_interval_secs: u32,
    /// Base reconnect delay in seconds.
    pub reconnect_delay_secs: u32,
    /// Upper bound for the exponential reconnect delay.
    pub max_reconnect_delay_secs: u32,
    /// How long a channel subscription may take to be acknowledged.
    pub subscribe_timeout_secs: u32,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            subscribe_timeout_secs: 10,
        }
    }
}
