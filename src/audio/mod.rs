pub mod backends;
pub mod buffer;
pub mod convert;
pub mod output_queue;
pub mod readiness;
pub mod state_cache;

use std::fmt;

use crate::error::BackendError;
use crate::models::{PlaybackState, SampleBuffer};

pub use backends::{
    default_candidates, select_backend, BackendCandidate, BackendRequest, NativeBackend,
    NativeContext, PluginBackend, PluginHost, PluginSink, StubBackend,
};
pub use buffer::SampleFifo;
pub use convert::convert;
pub use output_queue::OutputQueue;
pub use readiness::{GateStatus, ReadinessGate};
pub use state_cache::PlaybackStateCache;

/// Callback run once a backend can accept data, or has given up trying
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Concrete output variant behind a feeder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Device output through the platform audio API
    Native,
    /// Output through a host-provided plugin sink
    Plugin,
    /// Silent output that only simulates consumption
    Stub,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Plugin => "plugin",
            BackendKind::Stub => "stub",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set shared by every output variant.
///
/// Buffers arrive already converted to the backend's native `rate` and
/// `channels`. After `close` every operation fails with
/// [`BackendError::Closed`] except `close` itself, which stays a no-op.
pub trait OutputBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Native sample rate, fixed at construction
    fn rate(&self) -> u32;

    /// Native channel count, fixed at construction
    fn channels(&self) -> u16;

    /// Queue converted data without blocking on the device
    fn append_buffer(&mut self, buffer: SampleBuffer) -> Result<(), BackendError>;

    fn playback_state(&mut self) -> Result<PlaybackState, BackendError>;

    /// Run `callback` once output can accept data. Also runs it if readiness
    /// polling gives up, in which case the backend is closed afterwards.
    fn wait_until_ready(&mut self, callback: ReadyCallback) -> Result<(), BackendError>;

    fn start(&mut self) -> Result<(), BackendError>;

    /// Pause without discarding queued data
    fn stop(&mut self) -> Result<(), BackendError>;

    /// Release every resource held by the backend
    fn close(&mut self) -> Result<(), BackendError>;

    fn mute(&mut self) -> Result<(), BackendError>;

    fn unmute(&mut self) -> Result<(), BackendError>;

    fn is_closed(&self) -> bool;
}
