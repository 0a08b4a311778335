//! Error types for vocalis.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VocalisError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Microphone access denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Audio output errors
    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    #[error("Audio decode failed: {message}")]
    Decode { message: String },

    // Connection errors
    #[error("Connection failed: {message}")]
    Connection { message: String },

    // Session errors
    #[error("Upload failed: {message}")]
    Upload { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VocalisError>;
