//! Output through a host-provided plugin sink.
//!
//! The sink is slow to come up and expensive to talk to, so writes are
//! batched through an [`OutputQueue`], held back by a [`ReadinessGate`]
//! until the sink answers, and state queries go through a
//! [`PlaybackStateCache`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use super::BackendRequest;
use crate::audio::output_queue::{encoded_samples, OutputQueue, TransferFn};
use crate::audio::readiness::ReadinessGate;
use crate::audio::state_cache::PlaybackStateCache;
use crate::audio::{BackendKind, OutputBackend, ReadyCallback};
use crate::error::BackendError;
use crate::logging::{FeederLogger, OperationTimer};
use crate::models::{PlaybackState, SampleBuffer};

/// Fixed output rate of a plugin sink
pub const PLUGIN_RATE: u32 = 44100;

/// Fixed output channel count of a plugin sink
pub const PLUGIN_CHANNELS: u16 = 2;

/// Writes slower than this are reported
const SLOW_WRITE_THRESHOLD: Duration = Duration::from_millis(10);

/// Environment that can create plugin sinks
pub trait PluginHost: Send + Sync {
    /// Cheap capability check, run before any sink is created
    fn is_supported(&self) -> bool;

    fn instantiate(&self) -> Result<Box<dyn PluginSink>, BackendError>;
}

/// A live plugin instance.
///
/// `write` receives interleaved stereo 16-bit samples as lowercase hex, two
/// digits per byte with the low nibble first.
pub trait PluginSink: Send {
    /// True once the write entry point is available
    fn is_ready(&self) -> bool;

    fn write(&mut self, chunk: &str);

    /// Expensive query of the sink's real progress
    fn playback_state(&mut self) -> PlaybackState;

    fn start(&mut self);

    fn stop(&mut self);

    fn mute(&mut self);

    fn unmute(&mut self);

    /// Tear the instance down
    fn release(&mut self) {}
}

struct PluginShared {
    sink: Mutex<Option<Box<dyn PluginSink>>>,
    /// Samples flushed from the queue but still waiting on readiness
    deferred_samples: AtomicUsize,
    closed: AtomicBool,
    logger: FeederLogger,
}

impl PluginShared {
    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn PluginSink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live sink; `None` once released
    fn with_sink<R>(&self, f: impl FnOnce(&mut dyn PluginSink) -> R) -> Option<R> {
        let mut guard = self.lock();
        guard.as_mut().map(|sink| f(sink.as_mut()))
    }

    fn is_ready(&self) -> bool {
        self.with_sink(|sink| sink.is_ready()).unwrap_or(false)
    }

    fn write(&self, chunk: &str) {
        let timer = OperationTimer::new("plugin write".to_string());
        let written = self.with_sink(|sink| sink.write(chunk));
        let elapsed = timer.finish();

        if written.is_none() {
            debug!("Dropping {} samples written after close", encoded_samples(chunk));
        } else if elapsed > SLOW_WRITE_THRESHOLD {
            self.logger
                .log_performance_warning("plugin write", elapsed, SLOW_WRITE_THRESHOLD);
        }
    }

    fn release(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let sink = self.lock().take();
        if let Some(mut sink) = sink {
            sink.stop();
            sink.release();
        }
    }
}

pub struct PluginBackend {
    shared: Arc<PluginShared>,
    queue: OutputQueue,
    gate: ReadinessGate,
    cache: PlaybackStateCache,
    started: bool,
    logger: FeederLogger,
}

impl PluginBackend {
    pub fn is_supported(host: &dyn PluginHost) -> bool {
        host.is_supported()
    }

    pub fn new(host: &dyn PluginHost, request: &BackendRequest) -> Result<Self, BackendError> {
        let sink = host.instantiate()?;
        let shared = Arc::new(PluginShared {
            sink: Mutex::new(Some(sink)),
            deferred_samples: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            logger: request.logger.clone(),
        });

        let probe_shared = Arc::clone(&shared);
        let timeout_shared = Arc::clone(&shared);
        let timeout_logger = request.logger.clone();
        let gate = ReadinessGate::new(
            request.scheduler.handle(),
            request.config.ready_poll_interval(),
            request.config.ready_max_attempts,
            move || probe_shared.is_ready(),
            move |attempts| {
                timeout_logger.log_backend_timeout(BackendKind::Plugin.as_str(), attempts);
                timeout_shared.release();
            },
        );

        let transfer: TransferFn = {
            let shared = Arc::clone(&shared);
            let gate = gate.clone();
            Arc::new(move |chunk: String| {
                let samples = encoded_samples(&chunk);
                shared.deferred_samples.fetch_add(samples, Ordering::SeqCst);
                let shared = Arc::clone(&shared);
                gate.wait(Box::new(move || {
                    shared.deferred_samples.fetch_sub(samples, Ordering::SeqCst);
                    shared.write(&chunk);
                }));
            })
        };

        info!("Plugin output at {} Hz, {} channels", PLUGIN_RATE, PLUGIN_CHANNELS);

        Ok(Self {
            shared,
            queue: OutputQueue::new(request.scheduler.handle(), transfer),
            gate,
            cache: PlaybackStateCache::new(request.config.state_refresh_interval()),
            started: false,
            logger: request.logger.clone(),
        })
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// Frames accepted but not yet handed to the sink
    fn pending_frames(&self) -> f64 {
        let samples = self.queue.pending_samples() + self.shared.deferred_samples.load(Ordering::SeqCst);
        samples as f64 / PLUGIN_CHANNELS as f64
    }

    /// Apply a control call once the sink is up, after any writes queued ahead of it
    fn when_ready(&self, action: fn(&mut dyn PluginSink)) {
        self.queue.flush();
        let shared = Arc::clone(&self.shared);
        self.gate.wait(Box::new(move || {
            shared.with_sink(action);
        }));
    }
}

impl OutputBackend for PluginBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Plugin
    }

    fn rate(&self) -> u32 {
        PLUGIN_RATE
    }

    fn channels(&self) -> u16 {
        PLUGIN_CHANNELS
    }

    fn append_buffer(&mut self, buffer: SampleBuffer) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.queue.append(&buffer);
        Ok(())
    }

    fn playback_state(&mut self) -> Result<PlaybackState, BackendError> {
        self.ensure_open()?;
        let pending = self.pending_frames();

        if !self.shared.is_ready() {
            return Ok(PlaybackState {
                samples_queued: pending,
                ..PlaybackState::default()
            });
        }

        let shared = Arc::clone(&self.shared);
        let mut state = self.cache.resolve(Instant::now(), PLUGIN_RATE, self.started, move || {
            shared
                .with_sink(|sink| sink.playback_state())
                .unwrap_or_default()
        });
        state.samples_queued += pending;
        Ok(state)
    }

    fn wait_until_ready(&mut self, callback: ReadyCallback) -> Result<(), BackendError> {
        self.ensure_open()?;
        let logger = self.logger.clone();
        let shared = Arc::clone(&self.shared);
        let requested = Instant::now();
        self.gate.wait(Box::new(move || {
            if !shared.closed.load(Ordering::SeqCst) {
                logger.log_backend_ready(BackendKind::Plugin.as_str(), requested.elapsed());
            }
            callback();
        }));
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.started = true;
        self.when_ready(|sink| sink.start());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.started = false;
        self.when_ready(|sink| sink.stop());
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.started = false;
        self.queue.clear();
        self.cache.invalidate();
        self.shared.release();
        self.gate.cancel();
        Ok(())
    }

    fn mute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.when_ready(|sink| sink.mute());
        Ok(())
    }

    fn unmute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.when_ready(|sink| sink.unmute());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for PluginBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
