//! Analyser validation (FFT size, smoothing, decibel range, threshold).

use crate::schema::CelflicksConfig;

use super::helpers::validate_range;

/// Validate all analyser-related constraints.
pub(crate) fn validate_analyser(errors: &mut Vec<String>, config: &CelflicksConfig) {
    let analyser = &config.audio.analyser;

    validate_range(errors, "audio.analyser.fft_size", analyser.fft_size, 32, 32768);
    if !analyser.fft_size.is_power_of_two() {
        errors.push(format!(
            "audio.analyser.fft_size = {} is not a power of two",
            analyser.fft_size
        ));
    }
    validate_range(
        errors,
        "audio.analyser.smoothing_time_constant",
        analyser.smoothing_time_constant,
        0.0,
        1.0,
    );
    if analyser.min_decibels >= analyser.max_decibels {
        errors.push(format!(
            "audio.analyser.min_decibels = {} must be below max_decibels = {}",
            analyser.min_decibels, analyser.max_decibels
        ));
    }
    validate_range(
        errors,
        "audio.analyser.speaking_threshold",
        analyser.speaking_threshold,
        0,
        255,
    );
    validate_range(
        errors,
        "audio.analyser.sample_interval_ms",
        analyser.sample_interval_ms,
        5,
        1000,
    );
}
