//! Audio output abstraction: speech clips and short cue tones.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A decoded piece of speech, interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Playback length of the clip.
    pub fn duration(&self) -> Duration {
        if self.channels == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64)
    }
}

/// Trait for audio output devices.
///
/// Speech and cues travel separate paths so a cue never waits behind speech.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Device sample rate; tones are synthesized at this rate.
    fn sample_rate(&self) -> u32;

    /// Play one clip, resolving when it has finished or playback was halted.
    async fn render(&self, clip: AudioClip) -> Result<()>;

    /// Stop speech immediately and discard anything still queued.
    fn halt(&self);

    /// Mix mono samples at [`AudioOutput::sample_rate`] into the cue path.
    fn play_tone(&self, samples: Vec<f32>) -> Result<()>;
}

/// Recording output for tests.
///
/// Every render resolves after a fixed delay, or at once when halted.
#[derive(Debug)]
pub struct MockAudioOutput {
    sample_rate: u32,
    render_delay: Duration,
    rendered: Mutex<Vec<AudioClip>>,
    tones: Mutex<Vec<Vec<f32>>>,
    halts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    halt_notify: Notify,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self {
            sample_rate: 48000,
            render_delay: Duration::ZERO,
            rendered: Mutex::new(Vec::new()),
            tones: Mutex::new(Vec::new()),
            halts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            halt_notify: Notify::new(),
        }
    }

    /// How long each clip "plays"
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Clips handed to render, in call order
    pub fn rendered(&self) -> Vec<AudioClip> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Tone buffers handed to play_tone, in call order
    pub fn tones(&self) -> Vec<Vec<f32>> {
        self.tones.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    /// Highest number of renders ever in flight at once
    pub fn max_concurrent_renders(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Default for MockAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for MockAudioOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn render(&self, clip: AudioClip) -> Result<()> {
        let notified = self.halt_notify.notified();
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(clip);
        }
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        tokio::select! {
            _ = tokio::time::sleep(self.render_delay) => {}
            _ = notified => {}
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
        self.halt_notify.notify_waiters();
    }

    fn play_tone(&self, samples: Vec<f32>) -> Result<()> {
        if let Ok(mut tones) = self.tones.lock() {
            tones.push(samples);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn clip(len: usize) -> AudioClip {
        AudioClip {
            samples: vec![0; len],
            channels: 1,
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_clip_duration() {
        assert_eq!(clip(16000).duration(), Duration::from_secs(1));
        let stereo = AudioClip {
            samples: vec![0; 16000],
            channels: 2,
            sample_rate: 16000,
        };
        assert_eq!(stereo.duration(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_mock_output_records_renders_in_order() {
        let output = MockAudioOutput::new();
        output.render(clip(1)).await.unwrap();
        output.render(clip(2)).await.unwrap();

        let lengths: Vec<usize> = output.rendered().iter().map(|c| c.samples.len()).collect();
        assert_eq!(lengths, vec![1, 2]);
        assert_eq!(output.max_concurrent_renders(), 1);
    }

    #[tokio::test]
    async fn test_halt_cuts_render_short() {
        let output = Arc::new(MockAudioOutput::new().with_render_delay(Duration::from_secs(30)));
        let rendering = {
            let output = Arc::clone(&output);
            tokio::spawn(async move { output.render(clip(10)).await })
        };

        while output.rendered().is_empty() {
            tokio::task::yield_now().await;
        }
        output.halt();

        let result = tokio::time::timeout(Duration::from_secs(2), rendering).await;
        assert!(result.is_ok(), "render should finish promptly after halt");
        assert_eq!(output.halt_count(), 1);
    }

    #[test]
    fn test_play_tone_is_recorded() {
        let output = MockAudioOutput::new();
        output.play_tone(vec![0.1, 0.2]).unwrap();
        assert_eq!(output.tones(), vec![vec![0.1, 0.2]]);
    }
}
