//! Band-power estimation for EEG windows.
//!
//! Each channel of a window is de-meaned, tapered with a Hann window and
//! transformed with a real-input FFT. The resulting power spectral density is
//! summed over the bins whose centre frequency falls inside a band, and the
//! per-channel band powers are averaged across channels.

use std::sync::Arc;

use apodize::hanning_iter;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use thiserror::Error;
use tracing::debug;

use eeg_types::{BandPowers, RawWindow};

/// Shortest window the estimator accepts.
pub const MIN_WINDOW_LEN: usize = 8;

/// A half-open frequency interval `[lo_hz, hi_hz)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub name: &'static str,
    pub lo_hz: f64,
    pub hi_hz: f64,
}

impl Band {
    /// A bin belongs to a band by its centre frequency only; it is never split.
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.lo_hz && freq_hz < self.hi_hz
    }
}

pub const THETA: Band = Band { name: "theta", lo_hz: 4.0, hi_hz: 7.0 };
pub const ALPHA: Band = Band { name: "alpha", lo_hz: 7.0, hi_hz: 11.0 };
pub const BETA: Band = Band { name: "beta", lo_hz: 11.0, hi_hz: 20.0 };

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpectrumError {
    /// Not enough samples yet. The caller should skip this tick.
    #[error("window not ready: have {have} samples, need {need}")]
    NotReady { have: usize, need: usize },
    #[error("window has no channels")]
    NoChannels,
    #[error("window sampled at {got} Hz, estimator configured for {expected} Hz")]
    SampleRateMismatch { expected: u32, got: u32 },
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("window length {0} is shorter than the minimum of {MIN_WINDOW_LEN} samples")]
    WindowTooShort(usize),
}

impl SpectrumError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SpectrumError::NotReady { .. })
    }
}

/// Converts fixed-length windows into theta/alpha/beta band powers.
pub struct BandPowerEstimator {
    sample_rate: u32,
    window_len: usize,
    fft: Arc<dyn Fft<f64>>,
    taper: Vec<f64>,
    psd_scale: f64,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl BandPowerEstimator {
    pub fn new(sample_rate: u32, window_len: usize) -> Result<Self, SpectrumError> {
        if sample_rate == 0 {
            return Err(SpectrumError::InvalidSampleRate(sample_rate));
        }
        if window_len < MIN_WINDOW_LEN {
            return Err(SpectrumError::WindowTooShort(window_len));
        }

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(window_len);
        let taper: Vec<f64> = hanning_iter(window_len).collect();
        // Classic periodogram normalisation: |X|^2 / (fs * sum(w^2))
        let s2: f64 = taper.iter().map(|w| w * w).sum();
        let psd_scale = 1.0 / (sample_rate as f64 * s2);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        debug!(sample_rate, window_len, "band-power estimator ready");

        Ok(Self {
            sample_rate,
            window_len,
            fft,
            taper,
            psd_scale,
            buffer: vec![Complex::default(); window_len],
            scratch,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Frequency spacing between adjacent bins, `fs / W`.
    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate as f64 / self.window_len as f64
    }

    /// Estimates band powers from the most recent `window_len` samples of
    /// every channel, averaged across channels.
    pub fn estimate(&mut self, window: &RawWindow) -> Result<BandPowers, SpectrumError> {
        if window.sample_rate != self.sample_rate {
            return Err(SpectrumError::SampleRateMismatch {
                expected: self.sample_rate,
                got: window.sample_rate,
            });
        }
        if window.channels.is_empty() {
            return Err(SpectrumError::NoChannels);
        }
        let shortest = window.channels.iter().map(Vec::len).min().unwrap_or(0);
        if shortest < self.window_len {
            return Err(SpectrumError::NotReady {
                have: shortest,
                need: self.window_len,
            });
        }

        let mut total = BandPowers::default();
        for channel in &window.channels {
            let recent = &channel[channel.len() - self.window_len..];
            let p = self.channel_powers(recent);
            total.theta += p.theta;
            total.alpha += p.alpha;
            total.beta += p.beta;
        }

        let n = window.channels.len() as f64;
        Ok(BandPowers::new(total.theta / n, total.alpha / n, total.beta / n))
    }

    fn channel_powers(&mut self, samples: &[f32]) -> BandPowers {
        let w = self.window_len;
        let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / w as f64;

        for ((slot, &x), &taper) in self.buffer.iter_mut().zip(samples).zip(&self.taper) {
            *slot = Complex::new((x as f64 - mean) * taper, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let df = self.bin_width_hz();
        let mut powers = BandPowers::default();
        // Non-negative bins only, 0..=W/2, without folding in the mirrored half.
        for k in 0..=w / 2 {
            let psd = self.buffer[k].norm_sqr() * self.psd_scale;
            let freq = k as f64 * df;
            if THETA.contains(freq) {
                powers.theta += psd * df;
            } else if ALPHA.contains(freq) {
                powers.alpha += psd * df;
            } else if BETA.contains(freq) {
                powers.beta += psd * df;
            }
        }
        powers
    }
}
