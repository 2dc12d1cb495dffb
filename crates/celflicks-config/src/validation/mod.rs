//! Full configuration validation.
//!
//! Validates numeric ranges and the analyser's FFT constraints.
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod audio;
mod helpers;
mod misc;


use crate::schema::CelflicksConfig;
use celflicks_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &CelflicksConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    audio::validate_analyser(&mut errors, config);
    misc::validate_supabase(&mut errors, config);
    misc::validate_realtime(&mut errors, config);
    misc::validate_tables(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
