//! Nearest-neighbor rate conversion and naive channel mapping.
//!
//! This is deliberately not band-limited. Output sample `i` is input sample
//! `floor(i * from_rate / to_rate)` and every output channel has
//! `round(len * to_rate / from_rate)` samples, rounding halves up.

use crate::models::SampleBuffer;

/// Convert `buffer` from (`from_rate`, `from_channels`) to (`to_rate`, `to_channels`).
///
/// Identical formats return the buffer untouched. Output channels beyond the
/// input's channel count duplicate input channel 0; surplus input channels
/// are dropped.
pub fn convert(
    buffer: SampleBuffer,
    from_rate: u32,
    from_channels: u16,
    to_rate: u32,
    to_channels: u16,
) -> SampleBuffer {
    if from_rate == to_rate && from_channels == to_channels {
        return buffer;
    }

    let input = buffer.into_channels();
    let mut output = Vec::with_capacity(to_channels as usize);

    for channel in 0..to_channels as usize {
        let source = source_channel(channel, from_channels as usize);
        let samples = input
            .get(source)
            .map(|samples| resample_channel(samples, from_rate, to_rate))
            .unwrap_or_default();
        output.push(samples);
    }

    // Every output channel derives its length from the same input length,
    // so the channels stay even.
    SampleBuffer::new(output).unwrap_or_default()
}

/// Input channel feeding output channel `channel`
pub fn source_channel(channel: usize, from_channels: usize) -> usize {
    if channel < from_channels {
        channel
    } else {
        0
    }
}

/// `round(len * to_rate / from_rate)` with halves rounded up, in exact integer math
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    let numerator = len as u128 * to_rate as u128 * 2 + from_rate as u128;
    (numerator / (2 * from_rate as u128)) as usize
}

fn resample_channel(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let len = output_len(input.len(), from_rate, to_rate);
    let last = input.len() - 1;

    (0..len)
        .map(|i| {
            let index = (i as u128 * from_rate as u128 / to_rate as u128) as usize;
            input[index.min(last)]
        })
        .collect()
}
