//! Default configuration constants for vocalis.
//!
//! Shared by the config types and the session engine so that timeouts, audio
//! formats and cue tones stay consistent in one place.

use crate::pipeline::cue::{Cue, Waveform};

/// Default assistant endpoint.
pub const SERVER_URL: &str = "ws://localhost:8000/ws";

/// Timeout for the first connection attempt in milliseconds.
pub const FIRST_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Timeout for the retry connection attempt in milliseconds.
pub const RETRY_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Delay before the `error` state falls back to `idle`.
pub const ERROR_REVERT_MS: u64 = 3000;

/// Capture sample rate in Hz.
///
/// 16kHz mono is what the backend's speech recognizer consumes.
pub const SAMPLE_RATE: u32 = 16000;

/// RMS threshold (0.0 to 1.0) above which a chunk counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Trailing silence that closes an utterance, in milliseconds.
pub const SILENCE_DURATION_MS: u32 = 1500;

/// Minimum speech before an utterance is worth sending, in milliseconds.
pub const MIN_SPEECH_MS: u32 = 300;

/// Quiet kept ahead of detected speech so its onset is not clipped, in milliseconds.
pub const PRE_ROLL_MS: u32 = 300;

/// How often the capture task drains the device buffer.
pub const CAPTURE_POLL_MS: u64 = 20;

/// How often a playing clip checks for completion.
pub const RENDER_POLL_MS: u64 = 10;

/// Status text from the backend meaning "no speech found, keep talking".
pub const LISTENING_STATUS_MARKER: &str = "Listening";

pub const CUE_SESSION_START: Cue = Cue::new(880.0, 0.1, Waveform::Sine);
pub const CUE_LISTENING: Cue = Cue::new(880.0, 0.05, Waveform::Sine);
pub const CUE_PROCESSING: Cue = Cue::new(440.0, 0.05, Waveform::Sine);
pub const CUE_SPEAKING: Cue = Cue::new(660.0, 0.05, Waveform::Sine);
pub const CUE_ERROR: Cue = Cue::new(220.0, 0.3, Waveform::Sawtooth);
pub const CUE_MUTE: Cue = Cue::new(440.0, 0.1, Waveform::Sine);
pub const CUE_UNMUTE: Cue = Cue::new(880.0, 0.1, Waveform::Sine);
pub const CUE_STOP_SPEAKING: Cue = Cue::new(440.0, 0.1, Waveform::Sine);
