//! Local audio pipeline: microphone capture, frequency analysis and the
//! speaking detector, plus the playback seam for remote streams.

mod analyser;
mod sampler;
mod stream;

pub use analyser::FrequencyAnalyser;
pub use sampler::spawn_sampler;
pub use stream::{AudioTrack, MediaStream, SampleSource};

use async_trait::async_trait;

use celflicks_common::PeerId;
use celflicks_config::schema::CaptureConfig;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("no audio input device available")]
    NoInput,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio device error: {0}")]
    Device(String),
}

/// Processing requested from the capture backend. Best-effort: a backend
/// that cannot honour a flag still opens the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl From<&CaptureConfig> for AudioConstraints {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

/// Capture backend.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Whether the platform exposes any audio input at all.
    fn has_input(&self) -> bool;

    /// Prompt for (or reuse) microphone permission and open a stream.
    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<MediaStream, AudioError>;
}

/// Audio output for remote participants.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, peer: &PeerId, stream: MediaStream);
    fn stop(&self, peer: &PeerId);
}
