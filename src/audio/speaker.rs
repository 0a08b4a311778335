//! Speaker output through CPAL.
//!
//! One output stream runs for the whole session. Its callback mixes two
//! queues: speech clips, which can be halted, and cue tones, which cannot.

use crate::audio::capture::{SendableStream, with_suppressed_stderr};
use crate::audio::output::{AudioClip, AudioOutput};
use crate::audio::wav::convert_to_mono;
use crate::defaults;
use crate::error::{Result, VocalisError};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Mixer {
    speech: VecDeque<f32>,
    cues: VecDeque<f32>,
    /// Speech samples ever queued
    queued: u64,
    /// Speech samples consumed by the device (or discarded by a halt)
    played: u64,
    /// Bumped on every halt so pending renders notice
    generation: u64,
}

impl Mixer {
    /// Next mono output sample.
    fn next_sample(&mut self) -> f32 {
        let speech = match self.speech.pop_front() {
            Some(s) => {
                self.played += 1;
                s
            }
            None => 0.0,
        };
        let cue = self.cues.pop_front().unwrap_or(0.0);
        (speech + cue).clamp(-1.0, 1.0)
    }

    fn fill<T>(&mut self, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T)
    where
        T: Copy,
    {
        for frame in data.chunks_mut(channels.max(1)) {
            let value = convert(self.next_sample());
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }
    }

    fn halt(&mut self) {
        self.speech.clear();
        self.played = self.queued;
        self.generation += 1;
    }
}

/// Default output device, as a session-long stream.
pub struct CpalAudioOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    // Held for its Drop, which stops the stream
    _stream: Mutex<SendableStream>,
}

impl CpalAudioOutput {
    /// Open the default output device and start its stream.
    ///
    /// # Errors
    /// Returns `VocalisError::Playback` if there is no output device or the
    /// stream cannot be started.
    pub fn new() -> Result<Self> {
        let device = with_suppressed_stderr(|| cpal::default_host().default_output_device())
            .ok_or_else(|| VocalisError::Playback {
                message: "no output device available".to_string(),
            })?;

        let config = device
            .default_output_config()
            .map_err(|e| VocalisError::Playback {
                message: format!("Failed to query default output config: {}", e),
            })?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: cpal::StreamConfig = config.clone().into();
        let mixer = Arc::new(Mutex::new(Mixer::default()));

        let err_callback = |err| {
            tracing::warn!("Audio output stream error: {}", err);
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                let mixer = Arc::clone(&mixer);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match mixer.lock() {
                        Ok(mut m) => m.fill(data, channels, |s| s),
                        Err(_) => data.fill(0.0),
                    },
                    err_callback,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let mixer = Arc::clone(&mixer);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| match mixer.lock() {
                        Ok(mut m) => m.fill(data, channels, |s| (s * i16::MAX as f32) as i16),
                        Err(_) => data.fill(0),
                    },
                    err_callback,
                    None,
                )
            }
            fmt => {
                return Err(VocalisError::Playback {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        }
        .map_err(|e| VocalisError::Playback {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| VocalisError::Playback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::debug!("Output stream open: {}ch/{}Hz", channels, sample_rate);

        Ok(Self {
            mixer,
            sample_rate,
            _stream: Mutex::new(SendableStream(stream)),
        })
    }
}

#[async_trait]
impl AudioOutput for CpalAudioOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn render(&self, clip: AudioClip) -> Result<()> {
        let mono = convert_to_mono(
            &clip.samples,
            clip.channels as usize,
            clip.sample_rate,
            self.sample_rate,
        );

        let (target, generation) = {
            let mut mixer = self.mixer.lock().map_err(|e| VocalisError::Playback {
                message: format!("Failed to lock mixer: {}", e),
            })?;
            mixer
                .speech
                .extend(mono.iter().map(|&s| s as f32 / i16::MAX as f32));
            mixer.queued += mono.len() as u64;
            (mixer.queued, mixer.generation)
        };

        let poll = Duration::from_millis(defaults::RENDER_POLL_MS);
        loop {
            tokio::time::sleep(poll).await;
            let mixer = self.mixer.lock().map_err(|e| VocalisError::Playback {
                message: format!("Failed to lock mixer: {}", e),
            })?;
            if mixer.generation != generation || mixer.played >= target {
                return Ok(());
            }
        }
    }

    fn halt(&self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.halt();
        }
    }

    fn play_tone(&self, samples: Vec<f32>) -> Result<()> {
        let mut mixer = self.mixer.lock().map_err(|e| VocalisError::Playback {
            message: format!("Failed to lock mixer: {}", e),
        })?;
        mixer.cues.extend(samples);
        Ok(())
    }
}
