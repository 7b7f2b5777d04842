//! Public feeding API.
//!
//! A [`Feeder`] accepts sample buffers at a nominal rate and channel count,
//! converts them to whatever the selected backend plays natively, and
//! reports playback progress. The backend is chosen once in [`Feeder::init`]
//! and lives until [`Feeder::close`] or drop.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::audio::backends::native;
use crate::audio::{
    convert, default_candidates, select_backend, BackendCandidate, BackendKind, BackendRequest,
    NativeBackend, NativeContext, OutputBackend, PluginHost,
};
use crate::config::{ConfigManager, FeederConfig};
use crate::error::{FeederError, Precondition};
use crate::logging::FeederLogger;
use crate::models::{PlaybackState, SampleBuffer};
use crate::scheduler::Scheduler;

/// Backend construction slower than this is reported
const SLOW_SELECTION_THRESHOLD: Duration = Duration::from_millis(500);

/// Lifecycle of a feeder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Closed,
}

impl fmt::Display for FeederState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeederState::Uninitialized => "uninitialized",
            FeederState::Initialized => "initialized",
            FeederState::Started => "started",
            FeederState::Stopped => "stopped",
            FeederState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Construction options
#[derive(Clone, Default)]
pub struct FeederOptions {
    pub config: FeederConfig,
    /// Environment able to create plugin sinks; the plugin backend is only
    /// probed when this is set
    pub plugin_host: Option<Arc<dyn PluginHost>>,
}

impl FeederOptions {
    pub fn with_config(config: FeederConfig) -> Self {
        Self {
            config,
            plugin_host: None,
        }
    }

    /// Options loaded from a TOML file; a missing file gives defaults
    pub fn from_config_file(path: impl Into<PathBuf>) -> Result<Self, FeederError> {
        let manager = ConfigManager::with_path(path.into())?;
        Ok(Self::with_config(manager.get_config().clone()))
    }

    pub fn plugin_host(mut self, host: Arc<dyn PluginHost>) -> Self {
        self.plugin_host = Some(host);
        self
    }
}

type StarvedCallback = Box<dyn FnMut() + Send>;

pub struct Feeder {
    state: FeederState,
    backend: Option<Box<dyn OutputBackend>>,
    /// Nominal (rate, channels) recorded at init
    format: Option<(u32, u16)>,
    muted: bool,
    last_dropped: u64,
    on_starved: Option<StarvedCallback>,
    candidates: Vec<BackendCandidate>,
    config: FeederConfig,
    /// Keeps a dedicated runtime alive while the backend has work on it
    _scheduler: Option<Scheduler>,
    logger: FeederLogger,
}

impl Feeder {
    pub fn new(options: FeederOptions) -> Self {
        let candidates = default_candidates(options.plugin_host.clone());
        Self::with_candidates(options, candidates)
    }

    /// Feeder probing `candidates` in order instead of the default variants
    pub fn with_candidates(options: FeederOptions, candidates: Vec<BackendCandidate>) -> Self {
        Self {
            state: FeederState::Uninitialized,
            backend: None,
            format: None,
            muted: false,
            last_dropped: 0,
            on_starved: None,
            candidates,
            config: options.config,
            _scheduler: None,
            logger: FeederLogger::new(),
        }
    }

    /// True when a real output (native or a supported plugin host) exists
    pub fn is_supported() -> bool {
        NativeBackend::is_supported()
    }

    pub fn is_supported_with(host: &dyn PluginHost) -> bool {
        Self::is_supported() || host.is_supported()
    }

    /// Pre-warm the native output device once per process
    pub fn init_shared_output_context() -> Option<NativeContext> {
        native::init_shared_context()
    }

    /// Select a backend and record the nominal format.
    ///
    /// Selection itself never fails: a stub is used when nothing else works.
    pub fn init(&mut self, channels: u16, rate: u32) -> Result<(), FeederError> {
        match self.state {
            FeederState::Uninitialized => {}
            FeederState::Closed => return Err(FeederError::after_close("init")),
            _ => {
                return Err(FeederError::InvalidState {
                    operation: "init",
                    precondition: Precondition::AlreadyInitialized,
                })
            }
        }

        if channels == 0 || rate == 0 {
            return Err(FeederError::InvalidFormat {
                reason: format!("cannot feed {} channels at {} Hz", channels, rate),
            });
        }

        let scheduler = Scheduler::current_or_dedicated()?;
        let request = BackendRequest {
            channels,
            rate,
            config: self.config.clone(),
            scheduler: scheduler.clone(),
            logger: self.logger.clone(),
        };

        let backend = crate::time_operation_with_threshold!("backend selection", SLOW_SELECTION_THRESHOLD, {
            select_backend(&self.candidates, &request)
        });
        self.logger
            .log_backend_selected(backend.kind().as_str(), backend.rate(), backend.channels());
        if backend.rate() != rate || backend.channels() != channels {
            info!(
                "Converting {} Hz/{} ch input to {} Hz/{} ch",
                rate,
                channels,
                backend.rate(),
                backend.channels()
            );
        }

        self.backend = Some(backend);
        self.format = Some((rate, channels));
        self._scheduler = Some(scheduler);
        self.state = FeederState::Initialized;
        Ok(())
    }

    fn backend_mut(&mut self, operation: &'static str) -> Result<&mut Box<dyn OutputBackend>, FeederError> {
        match self.state {
            FeederState::Uninitialized => Err(FeederError::before_init(operation)),
            FeederState::Closed => Err(FeederError::after_close(operation)),
            _ => self
                .backend
                .as_mut()
                .ok_or_else(|| FeederError::before_init(operation)),
        }
    }

    /// Convert `samples` to the backend format and queue them.
    ///
    /// Never blocks; buffers reach the backend in call order.
    pub fn buffer_data(&mut self, samples: SampleBuffer) -> Result<(), FeederError> {
        let (rate, channels) = self.format.unwrap_or((0, 0));
        let backend = self.backend_mut("bufferData")?;

        if samples.channel_count() != channels as usize {
            return Err(FeederError::InvalidFormat {
                reason: format!(
                    "expected {} channels, got {}",
                    channels,
                    samples.channel_count()
                ),
            });
        }

        let converted = convert(samples, rate, channels, backend.rate(), backend.channels());
        debug!("Queued {} frames", converted.len());
        backend.append_buffer(converted)?;
        Ok(())
    }

    /// Current progress; fires the starvation callback when new underruns appear
    pub fn playback_state(&mut self) -> Result<PlaybackState, FeederError> {
        let state = self.backend_mut("getPlaybackState")?.playback_state()?;

        if state.dropped > self.last_dropped {
            self.last_dropped = state.dropped;
            self.logger.log_buffer_underrun(state.dropped, state.delayed_time);
            if let Some(callback) = self.on_starved.as_mut() {
                callback();
            }
        }

        Ok(state)
    }

    /// Run `callback` once the backend accepts data, or once it gave up.
    ///
    /// A fired callback is not proof of working output: after a readiness
    /// timeout the backend is closed and later calls fail.
    pub fn wait_until_ready<F>(&mut self, callback: F) -> Result<(), FeederError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.backend_mut("waitUntilReady")?
            .wait_until_ready(Box::new(callback))?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), FeederError> {
        self.backend_mut("start")?.start()?;
        self.state = FeederState::Started;
        self.logger.log_playback_started();
        Ok(())
    }

    /// Pause without discarding queued data
    pub fn stop(&mut self) -> Result<(), FeederError> {
        self.backend_mut("stop")?.stop()?;
        self.state = FeederState::Stopped;
        self.logger.log_playback_stopped();
        Ok(())
    }

    pub fn mute(&mut self) -> Result<(), FeederError> {
        self.backend_mut("mute")?.mute()?;
        self.muted = true;
        self.logger.log_muted(true);
        Ok(())
    }

    pub fn unmute(&mut self) -> Result<(), FeederError> {
        self.backend_mut("unmute")?.unmute()?;
        self.muted = false;
        self.logger.log_muted(false);
        Ok(())
    }

    /// Release the backend. A no-op before init; an error when already closed.
    pub fn close(&mut self) -> Result<(), FeederError> {
        match self.state {
            FeederState::Uninitialized => return Ok(()),
            FeederState::Closed => return Err(FeederError::after_close("close")),
            _ => {}
        }

        self.state = FeederState::Closed;
        if let Some(mut backend) = self.backend.take() {
            backend.close()?;
        }
        self.logger.log_closed();
        Ok(())
    }

    /// Callback fired whenever a state query sees the underrun count grow
    pub fn set_on_starved<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_starved = Some(Box::new(callback));
    }

    pub fn clear_on_starved(&mut self) {
        self.on_starved = None;
    }

    pub fn state(&self) -> FeederState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Nominal rate passed to `init`
    pub fn rate(&self) -> Option<u32> {
        self.format.map(|(rate, _)| rate)
    }

    /// Nominal channel count passed to `init`
    pub fn channels(&self) -> Option<u16> {
        self.format.map(|(_, channels)| channels)
    }

    pub fn backend_rate(&self) -> Option<u32> {
        self.backend.as_ref().map(|backend| backend.rate())
    }

    pub fn backend_channels(&self) -> Option<u16> {
        self.backend.as_ref().map(|backend| backend.channels())
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|backend| backend.kind())
    }

    /// True when the backend shut itself down, e.g. after a readiness timeout
    pub fn backend_closed(&self) -> bool {
        self.backend
            .as_ref()
            .map(|backend| backend.is_closed())
            .unwrap_or(false)
    }

    pub fn config(&self) -> &FeederConfig {
        &self.config
    }

    pub fn logger(&self) -> &FeederLogger {
        &self.logger
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.close() {
                warn!("Failed to close {} output on drop: {}", backend.kind(), e);
            }
        }
    }
}
