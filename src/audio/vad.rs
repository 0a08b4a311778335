//! Voice Activity Detection (VAD) for utterance endpointing.
//!
//! Detects speech activity using RMS thresholding. Durations are measured in
//! samples rather than wall-clock time, so the detector behaves the same no
//! matter how the capture loop batches its reads.

use crate::defaults;

/// Endpointing thresholds.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Chunk RMS (0.0 to 1.0) above which the chunk counts as speech
    pub speech_threshold: f32,
    /// Trailing silence that closes an utterance, in milliseconds
    pub silence_duration_ms: u32,
    /// Shorter utterances end silently, in milliseconds
    pub min_speech_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
    /// Quiet after speech, not yet long enough to end it
    MaybeSilence,
}

/// Outcome of one processed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    Speech,
    Silence,
    /// An utterance long enough to send has ended.
    SpeechEnd,
}

/// RMS voice activity detector.
///
/// After `SpeechEnd` the detector returns to `Idle` and waits for the next
/// utterance.
#[derive(Debug, Clone)]
pub struct Vad {
    config: VadConfig,
    sample_rate: u32,
    state: VadState,
    speech_samples: u64,
    silence_samples: u64,
}

impl Vad {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate: sample_rate.max(1),
            state: VadState::Idle,
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Processes one chunk of mono samples.
    pub fn process(&mut self, samples: &[i16]) -> VadEvent {
        if samples.is_empty() {
            return match self.state {
                VadState::Idle => VadEvent::Silence,
                VadState::Speaking => VadEvent::Speech,
                VadState::MaybeSilence => VadEvent::Silence,
            };
        }

        let is_speech = calculate_rms(samples) > self.config.speech_threshold;
        let len = samples.len() as u64;

        match self.state {
            VadState::Idle => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.speech_samples = len;
                    self.silence_samples = 0;
                    VadEvent::SpeechStart
                } else {
                    VadEvent::Silence
                }
            }
            VadState::Speaking => {
                if is_speech {
                    self.speech_samples += len;
                    VadEvent::Speech
                } else {
                    self.state = VadState::MaybeSilence;
                    self.silence_samples = len;
                    self.check_end()
                }
            }
            VadState::MaybeSilence => {
                if is_speech {
                    // The pause was part of the utterance
                    self.state = VadState::Speaking;
                    self.speech_samples += self.silence_samples + len;
                    self.silence_samples = 0;
                    VadEvent::Speech
                } else {
                    self.silence_samples += len;
                    self.check_end()
                }
            }
        }
    }

    fn check_end(&mut self) -> VadEvent {
        if self.silence_samples < self.samples_for(self.config.silence_duration_ms) {
            return VadEvent::Silence;
        }

        let long_enough = self.speech_samples >= self.samples_for(self.config.min_speech_ms);
        self.reset();
        if long_enough {
            VadEvent::SpeechEnd
        } else {
            VadEvent::Silence
        }
    }

    fn samples_for(&self, ms: u32) -> u64 {
        ms as u64 * self.sample_rate as u64 / 1000
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
