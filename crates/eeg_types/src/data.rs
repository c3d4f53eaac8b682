use serde::{Deserialize, Serialize};

/// A batch of multi-channel samples popped from the device in one pull.
///
/// Samples are interleaved by channel: frame `i` occupies
/// `samples[i * channel_count..(i + 1) * channel_count]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSamples {
    pub channel_count: usize,
    pub samples: Vec<f32>,
}

impl RawSamples {
    pub fn new(channel_count: usize, samples: Vec<f32>) -> Self {
        Self {
            channel_count,
            samples,
        }
    }

    /// Builds an interleaved batch from per-channel columns of equal length.
    pub fn from_channels(channels: &[Vec<f32>]) -> Self {
        let channel_count = channels.len();
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channel_count);
        for i in 0..frames {
            samples.extend(channels.iter().map(|ch| ch[i]));
        }
        Self {
            channel_count,
            samples,
        }
    }

    /// Number of complete frames (one sample per channel) in the batch.
    pub fn frame_count(&self) -> usize {
        if self.channel_count == 0 {
            0
        } else {
            self.samples.len() / self.channel_count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Iterates over complete frames. A trailing partial frame is ignored.
    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.chunks_exact(self.channel_count.max(1))
    }
}

/// The most recent fixed-duration span of samples, stored per channel.
///
/// Every channel holds the same number of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWindow {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl RawWindow {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Samples per channel. Zero when there are no channels.
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Integrated power in the theta, alpha and beta bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl BandPowers {
    pub fn new(theta: f64, alpha: f64, beta: f64) -> Self {
        Self { theta, alpha, beta }
    }

    pub fn is_finite(&self) -> bool {
        self.theta.is_finite() && self.alpha.is_finite() && self.beta.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaves_channels_into_frames() {
        let batch = RawSamples::from_channels(&[vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]);
        assert_eq!(batch.frame_count(), 3);
        assert_eq!(batch.samples, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let frames: Vec<&[f32]> = batch.frames().collect();
        assert_eq!(frames[1], &[2.0, 20.0]);
    }

    #[test]
    fn partial_trailing_frame_is_not_counted() {
        let batch = RawSamples::new(2, vec![1.0, 2.0, 3.0]);
        assert_eq!(batch.frame_count(), 1);
        assert_eq!(batch.frames().count(), 1);
        assert!(RawSamples::new(0, vec![]).is_empty());
    }

    #[test]
    fn window_reports_per_channel_length() {
        let window = RawWindow::new(250, vec![vec![0.0; 250], vec![0.0; 250]]);
        assert_eq!(window.len(), 250);
        assert_eq!(window.channel_count(), 2);
        assert!(RawWindow::new(250, vec![]).is_empty());
    }
}
