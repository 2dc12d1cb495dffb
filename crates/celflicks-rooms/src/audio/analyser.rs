use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use celflicks_config::schema::AnalyserConfig;

/// Byte frequency analyser with browser `AnalyserNode` semantics.
///
/// Each frame is Blackman-windowed, transformed, scaled by `1/fft_size`,
/// smoothed against the previous frame, converted to dB and mapped
/// linearly from `[min_decibels, max_decibels]` onto `0..=255`.
pub struct FrequencyAnalyser {
    fft_size: usize,
    smoothing: f64,
    min_db: f64,
    max_db: f64,
    threshold: f64,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    window: Vec<f64>,
    smoothed: Vec<f64>,
    bytes: Vec<u8>,
}

impl FrequencyAnalyser {
    pub fn new(config: &AnalyserConfig) -> Self {
        let fft_size = config.fft_size as usize;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        let n = fft_size as f64;
        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f64::consts::PI * i as f64 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        let bins = fft_size / 2;
        Self {
            fft_size,
            smoothing: config.smoothing_time_constant,
            min_db: config.min_decibels,
            max_db: config.max_decibels,
            threshold: f64::from(config.speaking_threshold),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            window,
            smoothed: vec![0.0; bins],
            bytes: vec![0; bins],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Analyse the latest `fft_size` samples. Short input is zero-padded.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> &[u8] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(f64::from(sample) * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let scale = 1.0 / self.fft_size as f64;
        let range = self.max_db - self.min_db;
        for (k, (smoothed, byte)) in self.smoothed.iter_mut().zip(self.bytes.iter_mut()).enumerate() {
            let magnitude = self.buffer[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

            // log10(0) is -inf, which clamps to 0.
            let db = 20.0 * smoothed.log10();
            let scaled = 255.0 / range * (db - self.min_db);
            *byte = scaled.clamp(0.0, 255.0).floor() as u8;
        }
        &self.bytes
    }

    /// Mean bin value of the last frame.
    pub fn mean_level(&self) -> f64 {
        if self.bytes.is_empty() {
            return 0.0;
        }
        self.bytes.iter().map(|&b| f64::from(b)).sum::<f64>() / self.bytes.len() as f64
    }

    /// Analyse one frame and decide whether the user is speaking.
    /// A disabled microphone is never speaking.
    pub fn is_speaking(&mut self, samples: &[f32], mic_enabled: bool) -> bool {
        self.byte_frequency_data(samples);
        mic_enabled && self.mean_level() > self.threshold
    }
}
