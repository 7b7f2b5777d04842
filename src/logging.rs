use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};

/// Feeder event recorded in the in-memory history
#[derive(Debug, Clone)]
pub struct FeederEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: FeederEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederEventType {
    BackendSelected,
    BackendReady,
    BackendTimeout,
    PlaybackStarted,
    PlaybackStopped,
    Muted,
    Unmuted,
    BufferUnderrun,
    StreamError,
    PerformanceWarning,
    Closed,
}

impl FeederEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeederEventType::BackendSelected => "BACKEND_SELECTED",
            FeederEventType::BackendReady => "BACKEND_READY",
            FeederEventType::BackendTimeout => "BACKEND_TIMEOUT",
            FeederEventType::PlaybackStarted => "PLAYBACK_STARTED",
            FeederEventType::PlaybackStopped => "PLAYBACK_STOPPED",
            FeederEventType::Muted => "MUTED",
            FeederEventType::Unmuted => "UNMUTED",
            FeederEventType::BufferUnderrun => "BUFFER_UNDERRUN",
            FeederEventType::StreamError => "STREAM_ERROR",
            FeederEventType::PerformanceWarning => "PERFORMANCE_WARNING",
            FeederEventType::Closed => "CLOSED",
        }
    }
}

/// Logger for feeder lifecycle and backend events.
///
/// Every event goes to the `log` facade and is also kept in a bounded
/// history that can be inspected after the fact.
#[derive(Clone)]
pub struct FeederLogger {
    events: Arc<Mutex<VecDeque<FeederEvent>>>,
    max_events: usize,
}

impl Default for FeederLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl FeederLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events,
        }
    }

    /// Initialize logging with the level from AUDIO_FEEDER_LOG_LEVEL, or info
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        Self::init_with_default("info")
    }

    /// Initialize logging, using `default_level` when the environment does not set one
    pub fn init_with_default(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("AUDIO_FEEDER_LOG_LEVEL")
            .unwrap_or_else(|_| default_level.to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        builder.filter_level(parse_level_filter(&log_level));
        builder.try_init()?;

        info!("Audio feeder logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Record an event and forward it to the log facade
    pub fn log_event(&self, event_type: FeederEventType, details: String, duration: Option<Duration>) {
        match event_type {
            FeederEventType::BackendSelected
            | FeederEventType::BackendReady
            | FeederEventType::PlaybackStarted
            | FeederEventType::PlaybackStopped
            | FeederEventType::Closed => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            FeederEventType::Muted | FeederEventType::Unmuted => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            FeederEventType::BufferUnderrun => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            FeederEventType::PerformanceWarning => {
                warn!("[{}] {} (duration: {:?})", event_type.as_str(), details, duration);
            }
            FeederEventType::BackendTimeout | FeederEventType::StreamError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
        }

        let event = FeederEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        };

        if let Ok(mut events) = self.events.lock() {
            events.push_back(event);
            while events.len() > self.max_events {
                events.pop_front();
            }
        }
    }

    pub fn log_backend_selected(&self, backend: &str, rate: u32, channels: u16) {
        self.log_event(
            FeederEventType::BackendSelected,
            format!("Using {} output ({} Hz, {} channels)", backend, rate, channels),
            None,
        );
    }

    pub fn log_backend_ready(&self, backend: &str, waited: Duration) {
        self.log_event(
            FeederEventType::BackendReady,
            format!("{} output ready", backend),
            Some(waited),
        );
    }

    pub fn log_backend_timeout(&self, backend: &str, attempts: u32) {
        self.log_event(
            FeederEventType::BackendTimeout,
            format!("{} output not ready after {} attempts; closing", backend, attempts),
            None,
        );
    }

    pub fn log_playback_started(&self) {
        self.log_event(FeederEventType::PlaybackStarted, "Playback started".to_string(), None);
    }

    pub fn log_playback_stopped(&self) {
        self.log_event(FeederEventType::PlaybackStopped, "Playback stopped".to_string(), None);
    }

    pub fn log_muted(&self, muted: bool) {
        let event_type = if muted {
            FeederEventType::Muted
        } else {
            FeederEventType::Unmuted
        };
        self.log_event(event_type, format!("Output muted: {}", muted), None);
    }

    pub fn log_buffer_underrun(&self, dropped: u64, delayed_time: f64) {
        self.log_event(
            FeederEventType::BufferUnderrun,
            format!(
                "Output starved (underruns: {}, silence inserted: {:.3}s)",
                dropped, delayed_time
            ),
            None,
        );
    }

    pub fn log_stream_error(&self, error: &str) {
        self.log_event(
            FeederEventType::StreamError,
            format!("Stream error: {}", error),
            None,
        );
    }

    pub fn log_performance_warning(&self, operation: &str, duration: Duration, threshold: Duration) {
        self.log_event(
            FeederEventType::PerformanceWarning,
            format!(
                "{} took {}ms (threshold: {}ms)",
                operation,
                duration.as_millis(),
                threshold.as_millis()
            ),
            Some(duration),
        );
    }

    pub fn log_closed(&self) {
        self.log_event(FeederEventType::Closed, "Feeder closed".to_string(), None);
    }

    /// Most recent events, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<FeederEvent> {
        match self.events.lock() {
            Ok(events) => {
                let skip = events.len().saturating_sub(count);
                events.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn get_event_statistics(&self) -> EventStatistics {
        let mut stats = EventStatistics::default();

        if let Ok(events) = self.events.lock() {
            for event in events.iter() {
                match event.event_type {
                    FeederEventType::BufferUnderrun => stats.buffer_underruns += 1,
                    FeederEventType::BackendTimeout => stats.backend_timeouts += 1,
                    FeederEventType::StreamError => stats.stream_errors += 1,
                    FeederEventType::PerformanceWarning => stats.performance_warnings += 1,
                    _ => {}
                }
            }
            stats.total_events = events.len();
        }

        stats
    }
}

fn parse_level_filter(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Statistics about logged events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub buffer_underruns: usize,
    pub backend_timeouts: usize,
    pub stream_errors: usize,
    pub performance_warnings: usize,
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: String) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        duration
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}

/// Macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $code:block) => {{
        let timer = $crate::logging::OperationTimer::new($name.to_string());
        let result = $code;
        let _duration = timer.finish();
        result
    }};
}

/// Macro for timing operations with threshold warnings
#[macro_export]
macro_rules! time_operation_with_threshold {
    ($name:expr, $threshold:expr, $code:block) => {{
        let timer = $crate::logging::OperationTimer::new($name.to_string());
        let result = $code;
        let _duration = timer.finish_with_threshold($threshold);
        result
    }};
}
