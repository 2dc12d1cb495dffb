//! Celflicks room client configuration.
//!
//! TOML-based configuration with full validation. All config sections use
//! defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use celflicks_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{CelflicksConfig, CONFIG_SCHEMA_VERSION};

use celflicks_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path.
///
/// Creates a default file if none exists, applies `SUPABASE_*` environment
/// overrides, and validates the result.
pub fn load_config() -> Result<CelflicksConfig, ConfigError> {
    let mut config = toml_loader::load_default()?;
    config.apply_env_overrides();
    validation::validate(&config)?;
    Ok(config)
}

/// Load config from an explicit path, then apply overrides and validate.
pub fn load_config_from(path: &Path) -> Result<CelflicksConfig, ConfigError> {
    let mut config = toml_loader::load_from_path(path)?;
    config.apply_env_overrides();
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string with secrets removed.
pub fn config_to_json(config: &CelflicksConfig) -> String {
    let mut redacted = config.clone();
    if !redacted.supabase.anon_key.is_empty() {
        redacted.supabase.anon_key = "[REDACTED]".into();
    }
    if redacted.supabase.access_token.is_some() {
        redacted.supabase.access_token = Some("[REDACTED]".into());
    }
    serde_json::to_string_pretty(&redacted)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let json = config_to_json(&CelflicksConfig::default());
        assert!(json.contains("\"supabase\""));
        assert!(json.contains("\"realtime\""));
        assert!(json.contains("\"tables\""));
        assert!(json.contains("\"audio\""));
        assert!(json.contains("\"logging\""));
    }

    #[test]
    fn config_to_json_redacts_keys() {
        let mut config = CelflicksConfig::default();
        config.supabase.anon_key = "anon-secret".into();
        config.supabase.access_token = Some("jwt-secret".into());
        let json = config_to_json(&config);
        assert!(!json.contains("anon-secret"));
        assert!(!json.contains("jwt-secret"));
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let json = config_to_json(&CelflicksConfig::default());
        let parsed: CelflicksConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.audio.analyser.fft_size, 256);
        assert_eq!(parsed.tables.profiles, "profiles");
    }
}
