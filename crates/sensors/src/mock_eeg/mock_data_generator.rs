use std::f32::consts::PI;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const TWO_PI: f32 = 2.0 * PI;

/// Standard deviation of the broadband background noise, microvolts.
const NOISE_STD_UV: f32 = 2.0;

/// Per-channel band amplitudes in microvolts.
/// Format: [delta, theta, alpha, beta, gamma]
const BASE_CHANNEL_WEIGHTS: [[f32; 5]; 8] = [
    [30.0, 15.0, 8.0, 4.0, 1.0],  // Frontal left (Fp1) - more delta/theta
    [30.0, 15.0, 8.0, 4.0, 1.0],  // Frontal right (Fp2)
    [20.0, 12.0, 15.0, 6.0, 1.0], // Central left (C3) - mix
    [20.0, 12.0, 15.0, 6.0, 1.0], // Central right (C4)
    [15.0, 10.0, 25.0, 7.0, 1.0], // Parietal left (P3) - stronger alpha
    [15.0, 10.0, 25.0, 7.0, 1.0], // Parietal right (P4)
    [12.0, 8.0, 30.0, 5.0, 1.0],  // Occipital left (O1) - strongest alpha
    [12.0, 8.0, 30.0, 5.0, 1.0],  // Occipital right (O2)
];

/// Period of the slow beta modulation that makes the engagement ratio drift.
const ENGAGEMENT_DRIFT_PERIOD_S: f32 = 30.0;

/// A generator for EEG-like data with multiple frequency bands, line noise
/// and Gaussian background noise. Output is in microvolts.
#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: u32,
    num_channels: usize,
    samples_generated: u64,
    rng: StdRng,
    // Band frequencies in Hz: [delta, theta, alpha, beta, gamma]
    band_freqs: [f32; 5],
    // Phase accumulators per channel, one per band
    phases: Vec<[f32; 5]>,
    line_noise_phase: Vec<f32>,
    line_noise_amplitude: Vec<f32>,
    channel_weights: Vec<[f32; 5]>,
}

impl EegGenerator {
    pub fn new(sample_rate: u32, num_channels: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        debug!(
            "Initializing EEG generator with {} Hz sample rate, {} channels",
            sample_rate, num_channels
        );

        let channel_weights = (0..num_channels)
            .map(|i| BASE_CHANNEL_WEIGHTS[i % BASE_CHANNEL_WEIGHTS.len()])
            .collect();

        let phases = (0..num_channels)
            .map(|_| {
                let mut p = [0.0f32; 5];
                for phase in p.iter_mut() {
                    *phase = rng.gen::<f32>() * TWO_PI;
                }
                p
            })
            .collect();
        let line_noise_phase = (0..num_channels).map(|_| rng.gen::<f32>() * TWO_PI).collect();
        // Different channels pick up different amounts of line noise
        let line_noise_amplitude = (0..num_channels).map(|_| rng.gen_range(2.0..7.0)).collect();

        Self {
            sample_rate,
            num_channels,
            samples_generated: 0,
            rng,
            band_freqs: [2.5, 6.0, 9.5, 15.0, 40.0],
            phases,
            line_noise_phase,
            line_noise_amplitude,
            channel_weights,
        }
    }

    /// Generates `frames` interleaved frames and appends them to `out`.
    pub fn generate_into(&mut self, frames: usize, out: &mut Vec<f32>) {
        out.reserve(frames * self.num_channels);
        let fs = self.sample_rate as f32;
        let increments: Vec<f32> = self.band_freqs.iter().map(|f| TWO_PI * f / fs).collect();
        let line_inc = TWO_PI * 60.0 / fs;

        for _ in 0..frames {
            let t_secs = self.samples_generated as f32 / fs;
            let beta_gain = 1.0 + 0.6 * (TWO_PI * t_secs / ENGAGEMENT_DRIFT_PERIOD_S).sin();

            for ch in 0..self.num_channels {
                let phases = &mut self.phases[ch];
                for (phase, inc) in phases.iter_mut().zip(&increments) {
                    *phase = (*phase + inc) % TWO_PI;
                }
                self.line_noise_phase[ch] = (self.line_noise_phase[ch] + line_inc) % TWO_PI;

                let w = self.channel_weights[ch];
                let signal = phases[0].sin() * w[0]
                    + phases[1].sin() * w[1]
                    + phases[2].sin() * w[2]
                    + phases[3].sin() * w[3] * beta_gain
                    + phases[4].sin() * w[4]
                    + self.line_noise_phase[ch].sin() * self.line_noise_amplitude[ch];

                let noise: f32 = self.rng.sample(StandardNormal);
                out.push(signal + noise * NOISE_STD_UV);
            }
            self.samples_generated += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_signal() {
        let mut a = EegGenerator::new(250, 4, 7);
        let mut b = EegGenerator::new(250, 4, 7);
        let (mut out_a, mut out_b) = (Vec::new(), Vec::new());
        a.generate_into(100, &mut out_a);
        b.generate_into(100, &mut out_b);
        assert_eq!(out_a.len(), 400);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn output_is_finite_and_bounded() {
        let mut gen = EegGenerator::new(125, 16, 1);
        let mut out = Vec::new();
        gen.generate_into(500, &mut out);
        assert!(out.iter().all(|v| v.is_finite() && v.abs() < 500.0));
    }
}
