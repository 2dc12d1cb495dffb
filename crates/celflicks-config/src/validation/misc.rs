//! Validation for the smaller config sections: supabase, realtime, tables.

use crate::schema::CelflicksConfig;

use super::helpers::validate_range;

/// Validate HTTP timeouts.
pub(crate) fn validate_supabase(errors: &mut Vec<String>, config: &CelflicksConfig) {
    validate_range(
        errors,
        "supabase.connect_timeout_secs",
        config.supabase.connect_timeout_secs,
        1,
        120,
    );
    validate_range(
        errors,
        "supabase.request_timeout_secs",
        config.supabase.request_timeout_secs,
        1,
        600,
    );
}

/// Validate realtime timings.
pub(crate) fn validate_realtime(errors: &mut Vec<String>, config: &CelflicksConfig) {
    let rt = &config.realtime;
    validate_range(errors, "realtime.heartbeat_interval_secs", rt.heartbeat_interval_secs, 5, 60);
    validate_range(errors, "realtime.reconnect_delay_secs", rt.reconnect_delay_secs, 1, 60);
    validate_range(
        errors,
        "realtime.max_reconnect_delay_secs",
        rt.max_reconnect_delay_secs,
        1,
        600,
    );
    if rt.max_reconnect_delay_secs < rt.reconnect_delay_secs {
        errors.push(format!(
            "realtime.max_reconnect_delay_secs = {} is below reconnect_delay_secs = {}",
            rt.max_reconnect_delay_secs, rt.reconnect_delay_secs
        ));
    }
    validate_range(errors, "realtime.subscribe_timeout_secs", rt.subscribe_timeout_secs, 1, 120);
}

/// Table names must be non-empty.
pub(crate) fn validate_tables(errors: &mut Vec<String>, config: &CelflicksConfig) {
    for (name, value) in [
        ("tables.rooms", &config.tables.rooms),
        ("tables.participants", &config.tables.participants),
        ("tables.profiles", &config.tables.profiles),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{name} must not be empty"));
        }
    }
}
