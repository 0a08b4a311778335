//! Session state as seen by presentation layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the voice interaction currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl VoiceState {
    /// States in which a session holds live resources.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            VoiceState::Connecting
                | VoiceState::Listening
                | VoiceState::Processing
                | VoiceState::Speaking
        )
    }

    /// States in which the microphone gate may be toggled.
    pub fn allows_mute(self) -> bool {
        matches!(
            self,
            VoiceState::Listening | VoiceState::Processing | VoiceState::Speaking
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Connecting => "connecting",
            VoiceState::Listening => "listening",
            VoiceState::Processing => "processing",
            VoiceState::Speaking => "speaking",
            VoiceState::Error => "error",
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the live interaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Session {
    pub state: VoiceState,
    pub started: bool,
    pub muted: bool,
    pub transcript: String,
    pub assistant_text: String,
    /// A document is waiting for the session to reach `listening`.
    pub pending_upload: bool,
}

/// Kind of document the assistant can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Pdf => f.write_str("PDF"),
            DocumentKind::Image => f.write_str("image"),
        }
    }
}

/// Notifications for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { from: VoiceState, to: VoiceState },
    /// Recognized user speech
    Transcript(String),
    /// Assistant reply or engine notice shown in the assistant's slot
    AssistantText(String),
    /// Informational status from the backend
    Status(String),
    MuteChanged(bool),
    /// The session entered `error` with this message
    Error(String),
    /// An utterance was sent, with its payload size in base64 bytes
    UtteranceSent { bytes: usize },
    DocumentSent(DocumentKind),
}
