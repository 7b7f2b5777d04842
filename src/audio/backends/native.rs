use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error, info, warn};

use super::BackendRequest;
use crate::audio::buffer::SampleFifo;
use crate::audio::{BackendKind, OutputBackend, ReadyCallback};
use crate::error::BackendError;
use crate::logging::FeederLogger;
use crate::models::{PlaybackState, SampleBuffer};

/// Descriptor of the output device opened by the shared-context pre-warm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeContext {
    pub device_name: String,
    pub rate: u32,
    pub channels: u16,
}

static SHARED_CONTEXT: OnceLock<Option<NativeContext>> = OnceLock::new();

/// Open the default output device once per process and remember its format.
///
/// Returns `None` when there is no native output.
pub fn init_shared_context() -> Option<NativeContext> {
    SHARED_CONTEXT
        .get_or_init(|| match probe_default_context() {
            Ok(context) => {
                info!(
                    "Shared output context: '{}' at {} Hz, {} channels",
                    context.device_name, context.rate, context.channels
                );
                Some(context)
            }
            Err(e) => {
                debug!("No shared output context: {}", e);
                None
            }
        })
        .clone()
}

/// Context created earlier by [`init_shared_context`], if any
pub fn shared_context() -> Option<NativeContext> {
    SHARED_CONTEXT.get().cloned().flatten()
}

fn probe_default_context() -> Result<NativeContext, BackendError> {
    let device = open_device(None)?;
    let config = device
        .default_output_config()
        .map_err(|e| BackendError::InitializationFailed(format!("Failed to get default config: {}", e)))?;
    Ok(NativeContext {
        device_name: device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate: config.sample_rate().0,
        channels: config.channels(),
    })
}

/// Preferred device by name, falling back to the host default
fn open_device(preferred: Option<&str>) -> Result<cpal::Device, BackendError> {
    let host = cpal::default_host();

    if let Some(name) = preferred {
        let found = host
            .output_devices()
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to enumerate devices: {}", e)))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => warn!("Output device '{}' not found, using default device", name),
        }
    }

    host.default_output_device()
        .ok_or_else(|| BackendError::InitializationFailed("No default output device available".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputCommand {
    Play,
    Pause,
    Shutdown,
}

struct NativeShared {
    fifo: SampleFifo,
    playing: AtomicBool,
    muted: AtomicBool,
}

struct StreamInfo {
    device_name: String,
    rate: u32,
    channels: u16,
    shared: Arc<NativeShared>,
}

/// Output through the platform audio API.
///
/// A dedicated "audio-output" thread owns the cpal stream for its whole
/// life; the backend talks to it through a command channel and a shared
/// sample FIFO that the stream callback drains.
pub struct NativeBackend {
    shared: Arc<NativeShared>,
    command_tx: Option<Sender<OutputCommand>>,
    thread: Option<thread::JoinHandle<()>>,
    device_name: String,
    rate: u32,
    channels: u16,
    closed: bool,
}

impl NativeBackend {
    pub fn is_supported() -> bool {
        if shared_context().is_some() {
            return true;
        }
        cpal::default_host().default_output_device().is_some()
    }

    pub fn new(request: &BackendRequest) -> Result<Self, BackendError> {
        // Prefer the device the shared context already opened
        let preferred = request
            .config
            .preferred_device
            .clone()
            .or_else(|| shared_context().map(|context| context.device_name));

        let (init_tx, init_rx) = mpsc::sync_channel::<Result<StreamInfo, BackendError>>(1);
        let (command_tx, command_rx) = mpsc::channel();
        let logger = request.logger.clone();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                run_output_thread(preferred, init_tx, command_rx, logger);
            })
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to create audio thread: {}", e)))?;

        let info = match init_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(BackendError::InitializationFailed(
                    "Audio thread exited during initialization".to_string(),
                ));
            }
        };

        info!(
            "Native output on '{}' at {} Hz, {} channels",
            info.device_name, info.rate, info.channels
        );

        Ok(Self::from_stream(info, command_tx, Some(thread)))
    }

    /// Wrap an opened stream and the channel to the thread that owns it
    fn from_stream(info: StreamInfo, command_tx: Sender<OutputCommand>, thread: Option<thread::JoinHandle<()>>) -> Self {
        Self {
            shared: info.shared,
            command_tx: Some(command_tx),
            thread,
            device_name: info.device_name,
            rate: info.rate,
            channels: info.channels,
            closed: false,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn send(&self, command: OutputCommand) -> Result<(), BackendError> {
        let sender = self.command_tx.as_ref().ok_or(BackendError::Closed)?;
        sender
            .send(command)
            .map_err(|_| BackendError::StreamError("Audio output thread is gone".to_string()))
    }
}

fn run_output_thread(
    preferred: Option<String>,
    init_tx: mpsc::SyncSender<Result<StreamInfo, BackendError>>,
    command_rx: Receiver<OutputCommand>,
    logger: FeederLogger,
) {
    let opened = open_device(preferred.as_deref()).and_then(|device| {
        let supported = device
            .default_output_config()
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to get default config: {}", e)))?;
        Ok((device, supported))
    });

    let (device, supported) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let shared = Arc::new(NativeShared {
        fifo: SampleFifo::new(config.channels, config.sample_rate.0),
        playing: AtomicBool::new(false),
        muted: AtomicBool::new(false),
    });

    let stream_result = match sample_format {
        SampleFormat::F32 => create_stream::<f32>(&device, &config, &shared, logger),
        SampleFormat::I16 => create_stream::<i16>(&device, &config, &shared, logger),
        SampleFormat::U16 => create_stream::<u16>(&device, &config, &shared, logger),
        other => Err(BackendError::UnsupportedSampleFormat {
            format: format!("{:?}", other),
        }),
    };

    let stream = match stream_result {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let info = StreamInfo {
        device_name: device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate: config.sample_rate.0,
        channels: config.channels,
        shared: Arc::clone(&shared),
    };
    if init_tx.send(Ok(info)).is_err() {
        return;
    }

    // Block on commands; a dropped sender shuts the stream down as well
    while let Ok(command) = command_rx.recv() {
        match command {
            OutputCommand::Play => {
                shared.playing.store(true, Ordering::SeqCst);
                if let Err(e) = stream.play() {
                    error!("Failed to start audio stream: {}", e);
                }
            }
            OutputCommand::Pause => {
                shared.playing.store(false, Ordering::SeqCst);
                if let Err(e) = stream.pause() {
                    debug!("Failed to pause audio stream: {}", e);
                }
            }
            OutputCommand::Shutdown => break,
        }
    }

    let _ = stream.pause();
    debug!("Audio output thread exiting");
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: &Arc<NativeShared>,
    logger: FeederLogger,
) -> Result<Stream, BackendError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let shared = Arc::clone(shared);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !shared.playing.load(Ordering::Relaxed) {
                    for sample in data.iter_mut() {
                        *sample = cpal::Sample::from_sample(0.0f32);
                    }
                    return;
                }

                scratch.resize(data.len(), 0.0);
                shared
                    .fifo
                    .render(&mut scratch, shared.muted.load(Ordering::Relaxed));
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = cpal::Sample::from_sample(*sample);
                }
            },
            move |err| {
                logger.log_stream_error(&err.to_string());
            },
            None,
        )
        .map_err(|e| BackendError::StreamError(format!("Failed to build output stream: {}", e)))
}

impl OutputBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn append_buffer(&mut self, buffer: SampleBuffer) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.shared.fifo.push_buffer(&buffer);
        Ok(())
    }

    fn playback_state(&mut self) -> Result<PlaybackState, BackendError> {
        self.ensure_open()?;
        Ok(self.shared.fifo.snapshot())
    }

    fn wait_until_ready(&mut self, callback: ReadyCallback) -> Result<(), BackendError> {
        self.ensure_open()?;
        // The stream is live as soon as construction returns
        callback();
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.send(OutputCommand::Play)
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.send(OutputCommand::Pause)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.playing.store(false, Ordering::SeqCst);

        if let Some(sender) = self.command_tx.take() {
            let _ = sender.send(OutputCommand::Shutdown);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Audio output thread panicked during shutdown");
            }
        }
        self.shared.fifo.clear();
        Ok(())
    }

    fn mute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.shared.muted.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn unmute(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.shared.muted.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::TryRecvError;
    use tokio_test::{assert_err, assert_ok};

    fn stream_info(rate: u32, channels: u16) -> StreamInfo {
        StreamInfo {
            device_name: "Test Output".to_string(),
            rate,
            channels,
            shared: Arc::new(NativeShared {
                fifo: SampleFifo::new(channels, rate),
                playing: AtomicBool::new(false),
                muted: AtomicBool::new(false),
            }),
        }
    }

    /// Backend with no output thread; commands land on the returned receiver
    fn detached_backend() -> (NativeBackend, Receiver<OutputCommand>) {
        let (command_tx, command_rx) = mpsc::channel();
        (NativeBackend::from_stream(stream_info(48000, 2), command_tx, None), command_rx)
    }

    fn assert_closed(result: Result<(), BackendError>) {
        let err = assert_err!(result);
        assert!(matches!(err, BackendError::Closed));
    }

    #[test]
    fn test_reports_stream_format() {
        let (backend, _commands) = detached_backend();
        assert_eq!(backend.kind(), BackendKind::Native);
        assert_eq!(backend.rate(), 48000);
        assert_eq!(backend.channels(), 2);
        assert_eq!(backend.device_name(), "Test Output");
        assert!(!backend.is_closed());
    }

    #[test]
    fn test_appended_frames_show_in_state() {
        let (mut backend, _commands) = detached_backend();
        assert_ok!(backend.append_buffer(SampleBuffer::filled(2, 480, 0.25)));

        let state = assert_ok!(backend.playback_state());
        assert_eq!(state.samples_queued, 480.0);
        assert_eq!(state.dropped, 0);
        assert_eq!(state.playback_position, 0.0);
    }

    #[test]
    fn test_controls_reach_output_thread() {
        let (mut backend, commands) = detached_backend();
        assert_ok!(backend.start());
        assert_ok!(backend.stop());

        assert_eq!(commands.try_recv(), Ok(OutputCommand::Play));
        assert_eq!(commands.try_recv(), Ok(OutputCommand::Pause));
        assert_eq!(commands.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_mute_flags_shared_with_callback() {
        let (mut backend, _commands) = detached_backend();
        assert_ok!(backend.mute());
        assert!(backend.shared.muted.load(Ordering::SeqCst));
        assert_ok!(backend.unmute());
        assert!(!backend.shared.muted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_ready_immediately() {
        let (mut backend, _commands) = detached_backend();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        assert_ok!(backend.wait_until_ready(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut backend, commands) = detached_backend();
        assert_ok!(backend.append_buffer(SampleBuffer::filled(2, 64, 0.5)));
        assert_ok!(backend.start());
        assert_eq!(commands.try_recv(), Ok(OutputCommand::Play));

        assert_ok!(backend.close());
        assert!(backend.is_closed());
        assert!(!backend.shared.playing.load(Ordering::SeqCst));
        assert!(backend.shared.fifo.is_empty());
        assert_eq!(commands.try_recv(), Ok(OutputCommand::Shutdown));

        assert_ok!(backend.close());
        // The sender went away with the first close
        assert_eq!(commands.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (mut backend, _commands) = detached_backend();
        assert_ok!(backend.close());

        assert_closed(backend.append_buffer(SampleBuffer::filled(2, 1, 0.0)));
        assert_closed(backend.playback_state().map(|_| ()));
        assert_closed(backend.wait_until_ready(Box::new(|| {
            panic!("callback after close");
        })));
        assert_closed(backend.start());
        assert_closed(backend.stop());
        assert_closed(backend.mute());
        assert_closed(backend.unmute());
    }

    #[test]
    fn test_close_joins_output_thread() {
        let (command_tx, command_rx) = mpsc::channel();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let thread = thread::spawn(move || {
            while let Ok(command) = command_rx.recv() {
                record.lock().unwrap().push(command);
                if command == OutputCommand::Shutdown {
                    break;
                }
            }
        });

        let mut backend = NativeBackend::from_stream(stream_info(44100, 1), command_tx, Some(thread));
        assert_ok!(backend.start());
        assert_ok!(backend.close());
        assert!(backend.thread.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![OutputCommand::Play, OutputCommand::Shutdown]);

        drop(backend);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
