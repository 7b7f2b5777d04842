use std::time::Duration;

use log::trace;
use tokio::time::Instant;

use crate::models::PlaybackState;

#[derive(Debug, Clone, Copy)]
struct CachedState {
    state: PlaybackState,
    captured_at: Instant,
}

/// Single timestamped slot in front of an expensive backend state query.
///
/// Within the refresh interval the last real state is extrapolated forward
/// by wall-clock time; past it a real query replaces the slot.
#[derive(Debug)]
pub struct PlaybackStateCache {
    slot: Option<CachedState>,
    refresh_interval: Duration,
}

impl PlaybackStateCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            slot: None,
            refresh_interval,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn has_state(&self) -> bool {
        self.slot.is_some()
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Return the cached state extrapolated to `now`, or run `query` and cache its result.
    ///
    /// Position and queue level only move while `playing`; a paused sink
    /// consumes nothing, so its cached copy is returned as-is.
    pub fn resolve<F>(&mut self, now: Instant, native_rate: u32, playing: bool, query: F) -> PlaybackState
    where
        F: FnOnce() -> PlaybackState,
    {
        if let Some(cached) = self.slot {
            let elapsed = now.saturating_duration_since(cached.captured_at);
            if elapsed < self.refresh_interval {
                trace!("Playback state cache hit ({:?} old)", elapsed);
                if !playing {
                    return cached.state;
                }
                return extrapolate(&cached.state, elapsed, native_rate);
            }
        }

        let state = query();
        self.slot = Some(CachedState {
            state,
            captured_at: now,
        });
        state
    }
}

/// Advance `state` by `elapsed` of consumption at `rate`; underrun counters carry over unchanged
pub fn extrapolate(state: &PlaybackState, elapsed: Duration, rate: u32) -> PlaybackState {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    PlaybackState {
        playback_position: state.playback_position + elapsed_ms / 1000.0,
        samples_queued: state.samples_queued - elapsed_ms * rate as f64 / 1000.0,
        dropped: state.dropped,
        delayed_time: state.delayed_time,
    }
}
