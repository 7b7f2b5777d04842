use serde::{Deserialize, Serialize};

use crate::error::FeederError;

/// One contiguous window of planar audio: a list of equal-length channels
/// holding samples normalized to [-1.0, 1.0].
///
/// The buffer owns its samples. Once handed to the feeder it is moved
/// through the pipeline and never shared with the caller again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Build a buffer from planar channel data, rejecting uneven channel lengths
    pub fn new(channels: Vec<Vec<f32>>) -> Result<Self, FeederError> {
        if let Some(first) = channels.first() {
            let expected = first.len();
            if let Some((index, channel)) = channels
                .iter()
                .enumerate()
                .find(|(_, channel)| channel.len() != expected)
            {
                return Err(FeederError::InvalidFormat {
                    reason: format!(
                        "channel {} has {} samples, expected {}",
                        index,
                        channel.len(),
                        expected
                    ),
                });
            }
        }

        Ok(Self { channels })
    }

    /// Single-channel buffer
    pub fn mono(samples: Vec<f32>) -> Self {
        Self {
            channels: vec![samples],
        }
    }

    /// Buffer of `frames` samples per channel, all set to `value`
    pub fn filled(channel_count: usize, frames: usize, value: f32) -> Self {
        Self {
            channels: vec![vec![value; frames]; channel_count],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Total sample count across all channels
    pub fn total_samples(&self) -> usize {
        self.channel_count() * self.len()
    }

    /// Samples interleaved frame by frame (L R L R ...)
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut out = Vec::with_capacity(self.total_samples());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// Snapshot of output progress returned by a playback state query
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Seconds of audio already rendered
    pub playback_position: f64,
    /// Frames still waiting to be rendered. May dip below zero under
    /// extrapolation; see [`PlaybackState::queued_clamped`].
    pub samples_queued: f64,
    /// Cumulative underrun count
    pub dropped: u64,
    /// Cumulative seconds of silence inserted during starvation
    pub delayed_time: f64,
}

impl PlaybackState {
    pub fn new(playback_position: f64, samples_queued: f64, dropped: u64, delayed_time: f64) -> Self {
        Self {
            playback_position,
            samples_queued,
            dropped,
            delayed_time,
        }
    }

    pub fn queued_clamped(&self) -> f64 {
        self.samples_queued.max(0.0)
    }

    /// Seconds of buffered audio at the given rate
    pub fn queued_seconds(&self, rate: u32) -> f64 {
        if rate == 0 {
            return 0.0;
        }
        self.queued_clamped() / rate as f64
    }
}
