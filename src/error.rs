use std::fmt;

use thiserror::Error;

/// Main feeder error type
#[derive(Debug, Error)]
pub enum FeederError {
    #[error("Invalid state: cannot {operation} {precondition}")]
    InvalidState {
        operation: &'static str,
        precondition: Precondition,
    },

    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Lifecycle precondition violated by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Operation requires `init` to have run
    NotInitialized,
    /// `init` was called twice
    AlreadyInitialized,
    /// Operation attempted on a closed feeder
    Closed,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::NotInitialized => write!(f, "before init"),
            Precondition::AlreadyInitialized => write!(f, "after init"),
            Precondition::Closed => write!(f, "after close"),
        }
    }
}

impl FeederError {
    pub(crate) fn before_init(operation: &'static str) -> Self {
        FeederError::InvalidState {
            operation,
            precondition: Precondition::NotInitialized,
        }
    }

    pub(crate) fn after_close(operation: &'static str) -> Self {
        FeederError::InvalidState {
            operation,
            precondition: Precondition::Closed,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            FeederError::InvalidState {
                operation,
                precondition: Precondition::NotInitialized,
            } => format!("The feeder must be initialized before calling {}", operation),
            FeederError::InvalidState {
                precondition: Precondition::AlreadyInitialized,
                ..
            } => "The feeder has already been initialized".to_string(),
            FeederError::InvalidState {
                operation,
                precondition: Precondition::Closed,
            } => format!("The feeder was closed; {} is no longer available", operation),
            FeederError::InvalidFormat { reason } => {
                format!("Sample data does not match the expected format: {}", reason)
            }
            FeederError::Backend(err) => err.user_message(),
            FeederError::Config(err) => err.user_message(),
        }
    }

    /// Check if this error allows the caller to continue with the same feeder
    pub fn is_recoverable(&self) -> bool {
        match self {
            FeederError::InvalidState {
                precondition: Precondition::Closed,
                ..
            } => false,
            FeederError::InvalidState { .. } => true, // init can still run
            FeederError::InvalidFormat { .. } => true, // next buffer may be fine
            FeederError::Backend(err) => err.is_recoverable(),
            FeederError::Config(err) => err.is_recoverable(),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FeederError::InvalidState { .. } => ErrorSeverity::Error,
            FeederError::InvalidFormat { .. } => ErrorSeverity::Warning,
            FeederError::Backend(BackendError::StreamError(_)) => ErrorSeverity::Critical,
            FeederError::Backend(BackendError::Unsupported { .. }) => ErrorSeverity::Info,
            FeederError::Backend(_) => ErrorSeverity::Error,
            FeederError::Config(_) => ErrorSeverity::Warning,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Output backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend is closed")]
    Closed,

    #[error("Backend not supported: {backend}")]
    Unsupported { backend: String },

    #[error("Unsupported sample format: {format}")]
    UnsupportedSampleFormat { format: String },

    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

impl BackendError {
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Closed => {
                "Audio output has been shut down".to_string()
            }
            BackendError::Unsupported { backend } => {
                format!("The {} output is not available on this system", backend)
            }
            BackendError::UnsupportedSampleFormat { format } => {
                format!("Sample format '{}' is not supported by the output device", format)
            }
            BackendError::InitializationFailed(msg) => {
                format!("Failed to initialize audio output: {}", msg)
            }
            BackendError::StreamError(msg) => {
                format!("Audio playback interrupted: {}", msg)
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            BackendError::Closed => false,
            BackendError::Unsupported { .. } => true, // Another backend may work
            BackendError::UnsupportedSampleFormat { .. } => true,
            BackendError::InitializationFailed(_) => true,
            BackendError::StreamError(_) => false,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        // Every configuration failure can fall back to defaults
        true
    }
}
