use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{PlaybackState, SampleBuffer};

#[derive(Debug, Default)]
struct FifoState {
    samples: VecDeque<f32>,
    frames_played: u64,
    underruns: u64,
    starved_frames: u64,
    starving: bool,
}

/// Interleaved sample queue drained by an output callback.
///
/// Tracks how much has been rendered and how often the callback found the
/// queue short, which is what a playback state query reports.
#[derive(Debug)]
pub struct SampleFifo {
    state: Mutex<FifoState>,
    channels: u16,
    sample_rate: u32,
}

impl SampleFifo {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            state: Mutex::new(FifoState::default()),
            channels: channels.max(1),
            sample_rate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FifoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue a planar buffer, interleaving it frame by frame
    pub fn push_buffer(&self, buffer: &SampleBuffer) {
        self.push_interleaved(&buffer.interleaved());
    }

    pub fn push_interleaved(&self, samples: &[f32]) {
        let mut state = self.lock();
        state.samples.extend(samples.iter().copied());
        if !samples.is_empty() {
            state.starving = false;
        }
    }

    pub fn queued_frames(&self) -> usize {
        self.lock().samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Fill `out` with queued samples, padding with silence when the queue
    /// runs dry. Samples are consumed even when `muted`.
    ///
    /// Returns the number of frames taken from the queue.
    pub fn render(&self, out: &mut [f32], muted: bool) -> usize {
        let channels = self.channels as usize;
        let mut state = self.lock();

        let available = state.samples.len().min(out.len());
        let whole = available - available % channels;

        for (slot, sample) in out.iter_mut().zip(state.samples.drain(..whole)) {
            *slot = if muted { 0.0 } else { sample };
        }
        for slot in out[whole..].iter_mut() {
            *slot = 0.0;
        }

        let frames = whole / channels;
        let missing = (out.len() - whole) / channels;
        state.frames_played += frames as u64;

        if missing > 0 {
            state.starved_frames += missing as u64;
            if !state.starving {
                state.starving = true;
                state.underruns += 1;
            }
        }

        frames
    }

    /// Current progress, with the queue level expressed in frames
    pub fn snapshot(&self) -> PlaybackState {
        let state = self.lock();
        let rate = self.sample_rate.max(1) as f64;
        PlaybackState {
            playback_position: state.frames_played as f64 / rate,
            samples_queued: (state.samples.len() / self.channels as usize) as f64,
            dropped: state.underruns,
            delayed_time: state.starved_frames as f64 / rate,
        }
    }

    pub fn clear(&self) {
        self.lock().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_creation() {
        let fifo = SampleFifo::new(2, 48000);
        assert_eq!(fifo.channels(), 2);
        assert_eq!(fifo.sample_rate(), 48000);
        assert!(fifo.is_empty());
        assert_eq!(fifo.snapshot(), PlaybackState::default());
    }

    #[test]
    fn test_push_interleaves_planar_input() {
        let fifo = SampleFifo::new(2, 4);
        fifo.push_buffer(&SampleBuffer::new(vec![vec![1.0, 2.0], vec![-1.0, -2.0]]).unwrap());
        assert_eq!(fifo.queued_frames(), 2);

        let mut out = [0.0f32; 4];
        assert_eq!(fifo.render(&mut out, false), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn test_render_pads_with_silence_and_counts_underrun() {
        let fifo = SampleFifo::new(1, 10);
        fifo.push_interleaved(&[0.1, 0.2, 0.3]);

        let mut out = [9.0f32; 5];
        assert_eq!(fifo.render(&mut out, false), 3);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0, 0.0]);

        let state = fifo.snapshot();
        assert!((state.playback_position - 0.3).abs() < 1e-9);
        assert_eq!(state.samples_queued, 0.0);
        assert_eq!(state.dropped, 1);
        assert!((state.delayed_time - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_one_underrun_per_starvation_episode() {
        let fifo = SampleFifo::new(1, 100);
        let mut out = [0.0f32; 10];

        fifo.render(&mut out, false);
        fifo.render(&mut out, false);
        assert_eq!(fifo.snapshot().dropped, 1);

        fifo.push_interleaved(&[0.5; 10]);
        fifo.render(&mut out, false);
        assert_eq!(fifo.snapshot().dropped, 1);

        fifo.render(&mut out, false);
        let state = fifo.snapshot();
        assert_eq!(state.dropped, 2);
        assert!((state.delayed_time - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_muted_render_consumes_silently() {
        let fifo = SampleFifo::new(1, 10);
        fifo.push_interleaved(&[0.7; 4]);

        let mut out = [1.0f32; 4];
        assert_eq!(fifo.render(&mut out, true), 4);
        assert_eq!(out, [0.0; 4]);
        assert!((fifo.snapshot().playback_position - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_partial_frames_are_not_split() {
        let fifo = SampleFifo::new(2, 10);
        fifo.push_interleaved(&[0.1, 0.2, 0.3]);

        let mut out = [1.0f32; 4];
        assert_eq!(fifo.render(&mut out, false), 1);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_concurrent_push_and_render() {
        let fifo = Arc::new(SampleFifo::new(2, 48000));
        let producer = {
            let fifo = Arc::clone(&fifo);
            thread::spawn(move || {
                for _ in 0..100 {
                    fifo.push_interleaved(&[0.25; 64]);
                }
            })
        };

        let mut rendered = 0;
        let mut out = [0.0f32; 32];
        while rendered < 3200 {
            rendered += fifo.render(&mut out, false);
            if fifo.is_empty() && producer.is_finished() {
                break;
            }
        }
        producer.join().unwrap();
        rendered += {
            let mut rest = vec![0.0f32; fifo.queued_frames() * 2];
            fifo.render(&mut rest, false)
        };

        assert_eq!(rendered, 3200);
    }
}
