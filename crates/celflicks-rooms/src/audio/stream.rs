//! Shared handle to a captured or received audio stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use celflicks_common::new_id;

/// Where a stream's PCM comes from. Implemented by the embedding
/// application's capture backend.
pub trait SampleSource: Send + Sync {
    /// Fill `out` with the most recent mono samples in `-1.0..=1.0`.
    fn read_latest(&self, out: &mut [f32]);
}

/// One audio track of a stream.
#[derive(Debug)]
pub struct AudioTrack {
    enabled: AtomicBool,
    ended: AtomicBool,
}

impl AudioTrack {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

struct StreamInner {
    id: String,
    tracks: Vec<AudioTrack>,
    source: Arc<dyn SampleSource>,
}

/// Cheaply cloneable stream handle.
///
/// Every clone refers to the same tracks: the analyser tap and every call
/// share one stream, and stopping it stops it for all of them.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

impl MediaStream {
    /// A stream with `track_count` tracks, all enabled.
    pub fn new(source: Arc<dyn SampleSource>, track_count: usize) -> Self {
        let tracks = (0..track_count.max(1))
            .map(|_| AudioTrack {
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            })
            .collect();
        Self {
            inner: Arc::new(StreamInner {
                id: new_id(),
                tracks,
                source,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[AudioTrack] {
        &self.inner.tracks
    }

    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.inner.tracks {
            track.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// True when any live track is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner
            .tracks
            .iter()
            .any(|t| t.is_enabled() && !t.is_ended())
    }

    /// End every track. Irreversible.
    pub fn stop(&self) {
        for track in &self.inner.tracks {
            track.enabled.store(false, Ordering::SeqCst);
            track.ended.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.tracks.iter().all(AudioTrack::is_ended)
    }

    /// Latest samples as an analyser would see them: silence while the
    /// stream is disabled or stopped.
    pub fn read_samples(&self, out: &mut [f32]) {
        if self.is_enabled() {
            self.inner.source.read_latest(out);
        } else {
            out.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NoiseSource;

    fn stream() -> MediaStream {
        MediaStream::new(Arc::new(NoiseSource::new(0.5)), 1)
    }

    #[test]
    fn clones_share_track_state() {
        let a = stream();
        let b = a.clone();
        a.set_enabled(false);
        assert!(!b.is_enabled());
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), stream().id());
    }

    #[test]
    fn stop_ends_every_track() {
        let s = MediaStream::new(Arc::new(NoiseSource::new(0.5)), 2);
        s.stop();
        assert!(s.is_stopped());
        assert!(s.tracks().iter().all(|t| t.is_ended() && !t.is_enabled()));
        s.set_enabled(true);
        assert!(!s.is_enabled());
    }

    #[test]
    fn disabled_stream_reads_silence() {
        let s = stream();
        let mut buf = vec![1.0; 64];
        s.set_enabled(false);
        s.read_samples(&mut buf);
        assert!(buf.iter().all(|&x| x == 0.0));

        s.set_enabled(true);
        s.read_samples(&mut buf);
        assert!(buf.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn zero_tracks_still_yields_one() {
        let s = MediaStream::new(Arc::new(NoiseSource::new(0.1)), 0);
        assert_eq!(s.tracks().len(), 1);
    }
}
