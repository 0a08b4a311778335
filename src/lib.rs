//! vocalis - Real-time voice assistant sessions
//!
//! Streams microphone audio to an assistant backend over a WebSocket and plays
//! its synthesized replies, driven by a small session state machine.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod connection;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod session;

// Device seams
pub use audio::backend::{AudioBackend, MockAudioBackend};
pub use audio::output::{AudioClip, AudioOutput};
pub use audio::recorder::AudioSource;

// Transport
pub use connection::{ConnectionManager, ConnectionStatus, Inbound, Outbound};

// Session engine
pub use session::{Document, DocumentKind, Session, SessionEvent, SessionHandle, VoiceState};

// Error handling
pub use error::{Result, VocalisError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
