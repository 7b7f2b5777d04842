use log::debug;
use tokio::time::Instant;

use super::BackendRequest;
use crate::audio::{BackendKind, OutputBackend, ReadyCallback};
use crate::error::BackendError;
use crate::models::{PlaybackState, SampleBuffer};

/// Silent output that consumes queued frames against the wall clock.
///
/// Native format is whatever the feeder asked for, so no conversion happens
/// upstream. While started, frames drain at `rate` per second; running dry
/// counts as an underrun and the shortfall accumulates as delayed time.
pub struct StubBackend {
    rate: u32,
    channels: u16,
    queued_frames: f64,
    played_frames: f64,
    starved_frames: f64,
    dropped: u64,
    starving: bool,
    playing_since: Option<Instant>,
    muted: bool,
    closed: bool,
}

impl StubBackend {
    /// Always available
    pub fn is_supported() -> bool {
        true
    }

    pub fn new(request: &BackendRequest) -> Self {
        Self::with_format(request.rate, request.channels)
    }

    pub fn with_format(rate: u32, channels: u16) -> Self {
        debug!("Stub output at {} Hz, {} channels", rate, channels);
        Self {
            rate: rate.max(1),
            channels: channels.max(1),
            queued_frames: 0.0,
            played_frames: 0.0,
            starved_frames: 0.0,
            dropped: 0,
            starving: false,
            playing_since: None,
            muted: false,
            closed: false,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// Consume whatever the clock says has played since the last tick
    fn advance(&mut self, now: Instant) {
        let Some(since) = self.playing_since else {
            return;
        };

        let wanted = now.saturating_duration_since(since).as_secs_f64() * self.rate as f64;
        let consumed = wanted.min(self.queued_frames);
        self.queued_frames -= consumed;
        self.played_frames += consumed;

        let missing = wanted - consumed;
        if missing > 0.0 {
            self.starved_frames += missing;
            if !self.starving {
                self.starving = true;
                self.dropped += 1;
            }
        }

        self.playing_since = Some(now);
    }
}

impl OutputBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Stub
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn append_buffer(&mut self, buffer: SampleBuffer) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.advance(Instant::now());
        if !buffer.is_empty() {
            self.queued_frames += buffer.len() as f64;
            self.starving = false;
        }
        Ok(())
    }

    fn playback_state(&mut self) -> Result<PlaybackState, BackendError> {
        self.ensure_open()?;
        self.advance(Instant::now());
        let rate = self.rate as f64;
        Ok(PlaybackState {
            playback_position: self.played_frames / rate,
            samples_queued: self.queued_frames,
            dropped: self.dropped,
            delayed_time: self.starved_frames / rate,
        })
    }

    fn wait_until_ready(&mut self, callback: ReadyCallback) -> Result<(), BackendError> {
        self.ensure_open()?;
        callback();
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.advance(Instant::now());
        self.playing_since = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.playing_since = None;
        self.queued_frames = 0.0;
        self.closed = true;
        Ok(())
    }

    fn mute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.muted = true;
        Ok(())
    }

    fn unmute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.muted = false;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const EPSILON: f64 = 1e-6;

    #[tokio::test(start_paused = true)]
    async fn test_native_format_matches_request() {
        let backend = StubBackend::with_format(22050, 1);
        assert_eq!(backend.rate(), 22050);
        assert_eq!(backend.channels(), 1);
        assert_eq!(backend.kind(), BackendKind::Stub);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_consumed_while_stopped() {
        let mut backend = StubBackend::with_format(1000, 2);
        assert_ok!(backend.append_buffer(SampleBuffer::filled(2, 500, 0.1)));

        tokio::time::advance(Duration::from_millis(300)).await;
        let state = backend.playback_state().unwrap();
        assert_eq!(state.samples_queued, 500.0);
        assert_eq!(state.playback_position, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumes_at_rate_while_started() {
        let mut backend = StubBackend::with_format(1000, 2);
        assert_ok!(backend.append_buffer(SampleBuffer::filled(2, 500, 0.1)));
        assert_ok!(backend.start());

        tokio::time::advance(Duration::from_millis(200)).await;
        let state = backend.playback_state().unwrap();
        assert!((state.samples_queued - 300.0).abs() < EPSILON);
        assert!((state.playback_position - 0.2).abs() < EPSILON);
        assert_eq!(state.dropped, 0);

        assert_ok!(backend.stop());
        tokio::time::advance(Duration::from_millis(200)).await;
        let paused = backend.playback_state().unwrap();
        assert!((paused.samples_queued - 300.0).abs() < EPSILON);

        assert_ok!(backend.start());
        tokio::time::advance(Duration::from_millis(100)).await;
        let resumed = backend.playback_state().unwrap();
        assert!((resumed.samples_queued - 200.0).abs() < EPSILON);
        assert!((resumed.playback_position - 0.3).abs() < EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starvation_counts_underrun_and_delay() {
        let mut backend = StubBackend::with_format(1000, 1);
        assert_ok!(backend.append_buffer(SampleBuffer::filled(1, 100, 0.1)));
        assert_ok!(backend.start());

        tokio::time::advance(Duration::from_millis(150)).await;
        let state = backend.playback_state().unwrap();
        assert_eq!(state.samples_queued, 0.0);
        assert_eq!(state.dropped, 1);
        assert!((state.delayed_time - 0.05).abs() < EPSILON);
        assert!((state.playback_position - 0.1).abs() < EPSILON);

        tokio::time::advance(Duration::from_millis(50)).await;
        let state = backend.playback_state().unwrap();
        assert_eq!(state.dropped, 1);
        assert!((state.delayed_time - 0.1).abs() < EPSILON);

        assert_ok!(backend.append_buffer(SampleBuffer::filled(1, 10, 0.1)));
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(backend.playback_state().unwrap().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_keeps_queue() {
        let mut backend = StubBackend::with_format(1000, 1);
        assert_ok!(backend.append_buffer(SampleBuffer::filled(1, 10, 0.1)));
        assert_ok!(backend.mute());
        assert!(backend.is_muted());
        assert_eq!(backend.playback_state().unwrap().samples_queued, 10.0);
        assert_ok!(backend.unmute());
        assert!(!backend.is_muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let mut backend = StubBackend::with_format(1000, 1);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&fired);
        assert_ok!(backend.wait_until_ready(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_backend_rejects_calls() {
        let mut backend = StubBackend::with_format(1000, 1);
        assert_ok!(backend.close());
        assert!(backend.is_closed());
        assert_ok!(backend.close());

        assert_err!(backend.append_buffer(SampleBuffer::filled(1, 1, 0.0)));
        assert_err!(backend.playback_state());
        assert_err!(backend.start());
        assert_err!(backend.mute());
        assert_err!(backend.wait_until_ready(Box::new(|| {})));
    }
}
