use std::collections::VecDeque;

use eeg_types::{RawSamples, RawWindow};

/// Keeps the most recent `capacity` samples of every channel.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    sample_rate: u32,
    capacity: usize,
    channels: Vec<VecDeque<f32>>,
}

impl SlidingWindow {
    pub fn new(sample_rate: u32, channel_count: usize, capacity: usize) -> Self {
        Self {
            sample_rate,
            capacity,
            channels: vec![VecDeque::with_capacity(capacity); channel_count],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples currently held per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        !self.channels.is_empty() && self.len() >= self.capacity
    }

    /// Appends a pulled batch and trims each channel back to `capacity`.
    ///
    /// A batch with a different channel layout is rejected and the window is
    /// left unchanged. Returns the number of frames appended.
    pub fn push(&mut self, batch: &RawSamples) -> Result<usize, usize> {
        if batch.channel_count != self.channels.len() {
            return Err(batch.channel_count);
        }
        let mut appended = 0;
        for frame in batch.frames() {
            for (channel, &value) in self.channels.iter_mut().zip(frame) {
                channel.push_back(value);
            }
            appended += 1;
        }
        for channel in &mut self.channels {
            let excess = channel.len().saturating_sub(self.capacity);
            channel.drain(..excess);
        }
        Ok(appended)
    }

    /// A copy of the full window, or `None` while it is still filling.
    pub fn snapshot(&self) -> Option<RawWindow> {
        if !self.is_full() {
            return None;
        }
        let channels = self
            .channels
            .iter()
            .map(|ch| ch.iter().copied().collect())
            .collect();
        Some(RawWindow::new(self.sample_rate, channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(frames: std::ops::Range<usize>) -> RawSamples {
        let ch0: Vec<f32> = frames.clone().map(|i| i as f32).collect();
        let ch1: Vec<f32> = frames.map(|i| -(i as f32)).collect();
        RawSamples::from_channels(&[ch0, ch1])
    }

    #[test]
    fn not_ready_until_full() {
        let mut window = SlidingWindow::new(10, 2, 10);
        assert!(window.snapshot().is_none());
        assert_eq!(window.push(&batch(0..6)), Ok(6));
        assert!(!window.is_full());
        assert!(window.snapshot().is_none());
        window.push(&batch(6..10)).unwrap();
        let snap = window.snapshot().expect("full window");
        assert_eq!(snap.len(), 10);
        assert_eq!(snap.sample_rate, 10);
    }

    #[test]
    fn keeps_only_the_most_recent_samples() {
        let mut window = SlidingWindow::new(10, 2, 4);
        window.push(&batch(0..3)).unwrap();
        window.push(&batch(3..9)).unwrap();
        let snap = window.snapshot().unwrap();
        assert_eq!(snap.channels[0], vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!(snap.channels[1], vec![-5.0, -6.0, -7.0, -8.0]);
    }

    #[test]
    fn empty_pull_changes_nothing() {
        let mut window = SlidingWindow::new(10, 2, 4);
        window.push(&batch(0..4)).unwrap();
        let before = window.snapshot();
        assert_eq!(window.push(&RawSamples::new(2, vec![])), Ok(0));
        assert_eq!(window.snapshot(), before);
    }

    #[test]
    fn rejects_a_different_channel_layout() {
        let mut window = SlidingWindow::new(10, 2, 4);
        assert_eq!(window.push(&RawSamples::new(3, vec![0.0; 9])), Err(3));
        assert!(window.is_empty());
    }
}
