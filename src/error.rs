//! Error types for the voice front-end

use thiserror::Error;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by configuration and the controller's public operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Voice control cannot run in this environment
    #[error("voice control unavailable: {0}")]
    Unavailable(String),

    /// Audio capture error
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Transcription error
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures acquiring or running the audio-capture device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform refused access to the microphone
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No input device is present
    #[error("no input device available")]
    NoDevice,

    /// The device exists but could not be opened
    #[error("audio device error: {0}")]
    Device(String),
}

/// Failures from either transcription capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranscriptionError {
    /// No continuous transcription backend exists here
    #[error("continuous transcription is not supported in this environment")]
    Unsupported,

    /// The continuous stream failed mid-flight or could not be started
    #[error("transcription stream error: {0}")]
    Stream(String),

    /// Buffer transcription backend failed
    #[error("transcription backend error: {0}")]
    Backend(String),
}
