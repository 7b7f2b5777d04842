//! Test doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::backends::{BackendCandidate, BackendRequest, PluginHost, PluginSink};
use crate::audio::{BackendKind, OutputBackend, ReadyCallback};
use crate::config::FeederConfig;
use crate::error::BackendError;
use crate::logging::FeederLogger;
use crate::models::{PlaybackState, SampleBuffer};
use crate::scheduler::Scheduler;

/// Let spawned flushes and drained callbacks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn test_request(channels: u16, rate: u32) -> BackendRequest {
    BackendRequest {
        channels,
        rate,
        config: FeederConfig::default(),
        scheduler: Scheduler::current_or_dedicated().unwrap(),
        logger: FeederLogger::new(),
    }
}

#[derive(Default)]
struct RecordingState {
    appended: Vec<SampleBuffer>,
    calls: Vec<&'static str>,
    state: PlaybackState,
}

/// What a [`RecordingBackend`] saw, readable after the backend moved into a feeder
#[derive(Clone, Default)]
pub struct RecordingLog(Arc<Mutex<RecordingState>>);

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appended(&self) -> Vec<SampleBuffer> {
        self.0.lock().unwrap().appended.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.0.lock().unwrap().state = state;
    }

    fn record(&self, call: &'static str) {
        self.0.lock().unwrap().calls.push(call);
    }
}

/// Backend with a configurable native format that records every call
pub struct RecordingBackend {
    log: RecordingLog,
    kind: BackendKind,
    rate: u32,
    channels: u16,
    closed: bool,
}

impl RecordingBackend {
    pub fn new(log: RecordingLog, kind: BackendKind, rate: u32, channels: u16) -> Self {
        Self {
            log,
            kind,
            rate,
            channels,
            closed: false,
        }
    }

    fn ensure_open(&self, call: &'static str) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        self.log.record(call);
        Ok(())
    }
}

impl OutputBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn append_buffer(&mut self, buffer: SampleBuffer) -> Result<(), BackendError> {
        self.ensure_open("append_buffer")?;
        self.log.0.lock().unwrap().appended.push(buffer);
        Ok(())
    }

    fn playback_state(&mut self) -> Result<PlaybackState, BackendError> {
        self.ensure_open("playback_state")?;
        Ok(self.log.0.lock().unwrap().state)
    }

    fn wait_until_ready(&mut self, callback: ReadyCallback) -> Result<(), BackendError> {
        self.ensure_open("wait_until_ready")?;
        callback();
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.ensure_open("start")
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.ensure_open("stop")
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if !self.closed {
            self.log.record("close");
            self.closed = true;
        }
        Ok(())
    }

    fn mute(&mut self) -> Result<(), BackendError> {
        self.ensure_open("mute")
    }

    fn unmute(&mut self) -> Result<(), BackendError> {
        self.ensure_open("unmute")
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub fn recording_candidate(kind: BackendKind, log: &RecordingLog, rate: u32, channels: u16) -> BackendCandidate {
    let log = log.clone();
    BackendCandidate::new(
        kind,
        || true,
        move |_| Ok(Box::new(RecordingBackend::new(log.clone(), kind, rate, channels)) as Box<dyn OutputBackend>),
    )
}

#[derive(Default)]
struct MockSinkState {
    ready: AtomicBool,
    released: AtomicBool,
    queries: AtomicUsize,
    writes: Mutex<Vec<String>>,
    calls: Mutex<Vec<&'static str>>,
    state: Mutex<PlaybackState>,
}

/// Test-side view of the sink a [`MockPluginHost`] hands out
#[derive(Clone, Default)]
pub struct MockSinkHandle(Arc<MockSinkState>);

impl MockSinkHandle {
    pub fn set_ready(&self, ready: bool) {
        self.0.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.0.state.lock().unwrap() = state;
    }

    pub fn writes(&self) -> Vec<String> {
        self.0.writes.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.calls.lock().unwrap().clone()
    }

    pub fn state_queries(&self) -> usize {
        self.0.queries.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.0.released.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.0.calls.lock().unwrap().push(call);
    }
}

struct MockSink {
    handle: MockSinkHandle,
}

impl PluginSink for MockSink {
    fn is_ready(&self) -> bool {
        self.handle.0.ready.load(Ordering::SeqCst)
    }

    fn write(&mut self, chunk: &str) {
        self.handle.record("write");
        self.handle.0.writes.lock().unwrap().push(chunk.to_string());
    }

    fn playback_state(&mut self) -> PlaybackState {
        self.handle.0.queries.fetch_add(1, Ordering::SeqCst);
        *self.handle.0.state.lock().unwrap()
    }

    fn start(&mut self) {
        self.handle.record("start");
    }

    fn stop(&mut self) {
        self.handle.record("stop");
    }

    fn mute(&mut self) {
        self.handle.record("mute");
    }

    fn unmute(&mut self) {
        self.handle.record("unmute");
    }

    fn release(&mut self) {
        self.handle.0.released.store(true, Ordering::SeqCst);
    }
}

/// Plugin host whose single sink is controlled from the test
pub struct MockPluginHost {
    supported: bool,
    fail_instantiate: AtomicBool,
    sink: MockSinkHandle,
}

impl MockPluginHost {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            fail_instantiate: AtomicBool::new(false),
            sink: MockSinkHandle::default(),
        }
    }

    pub fn sink(&self) -> MockSinkHandle {
        self.sink.clone()
    }

    pub fn fail_instantiate(&self) {
        self.fail_instantiate.store(true, Ordering::SeqCst);
    }
}

impl PluginHost for MockPluginHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn instantiate(&self) -> Result<Box<dyn PluginSink>, BackendError> {
        if self.fail_instantiate.load(Ordering::SeqCst) {
            return Err(BackendError::InitializationFailed("plugin failed to load".to_string()));
        }
        Ok(Box::new(MockSink {
            handle: self.sink.clone(),
        }))
    }
}
