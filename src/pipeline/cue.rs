//! Short synthesized tones that mark state changes.

use crate::audio::output::AudioOutput;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

/// Peak amplitude of a cue, kept well under speech level.
const CUE_AMPLITUDE: f32 = 0.2;

/// Fade-in/fade-out length that avoids clicks.
const FADE_SECS: f32 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Value at `phase` (in cycles, 0.0..1.0), in -1.0..=1.0.
    fn value(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cue {
    pub frequency: f32,
    pub duration_secs: f32,
    pub waveform: Waveform,
}

impl Cue {
    pub const fn new(frequency: f32, duration_secs: f32, waveform: Waveform) -> Self {
        Self {
            frequency,
            duration_secs,
            waveform,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.duration_secs.max(0.0))
    }
}

/// Render a cue to mono samples at `sample_rate`.
///
/// Non-positive frequency or duration yields silence (no samples).
pub fn synthesize(cue: &Cue, sample_rate: u32) -> Vec<f32> {
    let audible = cue.frequency > 0.0 && cue.duration_secs > 0.0 && sample_rate > 0;
    if !audible {
        return Vec::new();
    }

    let rate = sample_rate as f32;
    let len = (cue.duration_secs * rate).round() as usize;
    let fade = ((FADE_SECS * rate) as usize).min(len / 2).max(1);

    (0..len)
        .map(|i| {
            let phase = (i as f32 * cue.frequency / rate).fract();
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i >= len - fade {
                (len - 1 - i) as f32 / fade as f32
            } else {
                1.0
            };
            cue.waveform.value(phase) * envelope * CUE_AMPLITUDE
        })
        .collect()
}

/// Plays cues on the session's output device.
///
/// Fire-and-forget: a missing device or a failed write never reaches the
/// caller.
#[derive(Default)]
pub struct CueSynthesizer {
    output: Option<Arc<dyn AudioOutput>>,
    enabled: bool,
}

impl CueSynthesizer {
    pub fn new(enabled: bool) -> Self {
        Self {
            output: None,
            enabled,
        }
    }

    pub fn attach(&mut self, output: Arc<dyn AudioOutput>) {
        self.output = Some(output);
    }

    pub fn detach(&mut self) {
        self.output = None;
    }

    pub fn play_cue(&self, frequency: f32, duration_secs: f32, waveform: Waveform) {
        self.play(Cue::new(frequency, duration_secs, waveform));
    }

    pub fn play(&self, cue: Cue) {
        if !self.enabled {
            return;
        }
        let Some(output) = &self.output else {
            tracing::debug!("No output device, skipping {} Hz cue", cue.frequency);
            return;
        };

        let samples = synthesize(&cue, output.sample_rate());
        if samples.is_empty() {
            return;
        }
        if let Err(e) = output.play_tone(samples) {
            tracing::debug!("Cue playback failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockAudioOutput;

    #[test]
    fn test_synthesize_length_matches_duration() {
        let cue = Cue::new(880.0, 0.1, Waveform::Sine);
        assert_eq!(synthesize(&cue, 48000).len(), 4800);
    }

    #[test]
    fn test_synthesize_stays_within_amplitude() {
        for waveform in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Sawtooth,
            Waveform::Triangle,
        ] {
            let samples = synthesize(&Cue::new(440.0, 0.05, waveform), 16000);
            assert!(
                samples.iter().all(|s| s.abs() <= CUE_AMPLITUDE + 1e-6),
                "{:?} exceeds amplitude",
                waveform
            );
            assert!(samples.iter().any(|s| s.abs() > CUE_AMPLITUDE / 2.0));
        }
    }

    #[test]
    fn test_synthesize_fades_in_and_out() {
        let samples = synthesize(&Cue::new(440.0, 0.1, Waveform::Square), 16000);
        assert_eq!(samples[0], 0.0);
        assert_eq!(*samples.last().unwrap(), 0.0);
    }

    #[test]
    fn test_degenerate_cues_are_silent() {
        assert!(synthesize(&Cue::new(0.0, 0.1, Waveform::Sine), 16000).is_empty());
        assert!(synthesize(&Cue::new(440.0, 0.0, Waveform::Sine), 16000).is_empty());
        assert!(synthesize(&Cue::new(-5.0, -1.0, Waveform::Sine), 16000).is_empty());
        assert!(synthesize(&Cue::new(f32::NAN, 0.1, Waveform::Sine), 16000).is_empty());
    }

    #[test]
    fn test_play_without_output_is_noop() {
        let cues = CueSynthesizer::new(true);
        cues.play_cue(880.0, 0.1, Waveform::Sine);
    }

    #[test]
    fn test_play_reaches_output() {
        let output = Arc::new(MockAudioOutput::new().with_sample_rate(8000));
        let mut cues = CueSynthesizer::new(true);
        cues.attach(output.clone());

        cues.play_cue(660.0, 0.05, Waveform::Triangle);

        let tones = output.tones();
        assert_eq!(tones.len(), 1);
        assert_eq!(tones[0].len(), 400);
    }

    #[test]
    fn test_disabled_cues_are_silent() {
        let output = Arc::new(MockAudioOutput::new());
        let mut cues = CueSynthesizer::new(false);
        cues.attach(output.clone());

        cues.play_cue(660.0, 0.05, Waveform::Sine);

        assert!(output.tones().is_empty());
    }
}
