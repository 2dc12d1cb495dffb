use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use celflicks_config::schema::AnalyserConfig;

use super::analyser::FrequencyAnalyser;
use super::stream::MediaStream;

/// Spawn the fixed-rate speaking detector for `stream`.
///
/// Sends on `speaking_tx` only when the speaking state flips. The task ends
/// when the stream is stopped or the receiver is dropped; callers abort the
/// returned handle on leave.
pub fn spawn_sampler(
    stream: MediaStream,
    config: &AnalyserConfig,
    speaking_tx: mpsc::Sender<bool>,
) -> JoinHandle<()> {
    let mut analyser = FrequencyAnalyser::new(config);
    let period = Duration::from_millis(u64::from(config.sample_interval_ms.max(1)));

    tokio::spawn(async move {
        let mut samples = vec![0.0f32; analyser.fft_size()];
        let mut speaking = false;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if stream.is_stopped() {
                debug!(stream = %stream.id(), "Stream stopped, sampler exiting");
                break;
            }
            stream.read_samples(&mut samples);
            let now = analyser.is_speaking(&samples, stream.is_enabled());
            if now != speaking {
                speaking = now;
                trace!(speaking, level = analyser.mean_level(), "Speaking state flipped");
                if speaking_tx.send(speaking).await.is_err() {
                    break;
                }
            }
        }
    })
}
