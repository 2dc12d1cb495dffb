//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Celflicks room client configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[supabase]
# project_ref = ""            # <ref> in https://<ref>.supabase.co
# anon_key = ""               # or SUPABASE_ANON_KEY
# access_token is read from SUPABASE_ACCESS_TOKEN
# connect_timeout_secs = 10   # 1-120
# request_timeout_secs = 30   # 1-600

[realtime]
# heartbeat_interval_secs = 25   # 5-60
# reconnect_delay_secs = 1       # 1-60
# max_reconnect_delay_secs = 30  # 1-600
# subscribe_timeout_secs = 10    # 1-120

[tables]
# rooms = "audio_rooms"
# participants = "audio_room_participants"
# profiles = "profiles"

[audio.capture]
# echo_cancellation = true
# noise_suppression = true
# auto_gain_control = true

[audio.analyser]
# fft_size = 256                 # power of two, 32-32768
# smoothing_time_constant = 0.8  # 0.0-1.0
# min_decibels = -100.0
# max_decibels = -30.0
# speaking_threshold = 30        # 0-255
# sample_interval_ms = 16        # 5-1000

[logging]
# level = "INFO"                 # TRACE, DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
