//! Microphone capture and speaking-detection configuration.

use serde::{Deserialize, Serialize};

/// Processing requested from the capture device. Best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Frequency analyser and speaking threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// FFT window length in samples. Power of two, 32-32768.
    pub fft_size: u32,
    /// Temporal smoothing between frames, 0.0-1.0.
    pub smoothing_time_constant: f64,
    /// Level mapped to byte value 0.
    pub min_decibels: f64,
    /// Level mapped to byte value 255.
    pub max_decibels: f64,
    /// Mean bin value (0-255) above which the local user counts as speaking.
    pub speaking_threshold: u32,
    /// Sampling period of the speaking detector in milliseconds.
    pub sample_interval_ms: u32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            speaking_threshold: 30,
            sample_interval_ms: 16,
        }
    }
}

/// Audio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture: CaptureConfig,
    pub analyser: AnalyserConfig,
}
