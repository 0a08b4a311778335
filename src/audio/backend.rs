//! Factory for audio devices.
//!
//! The session engine acquires a fresh input device on every capture start
//! and one output device per session, so it needs to open devices on demand
//! rather than receive them once.

use crate::audio::output::{AudioOutput, MockAudioOutput};
use crate::audio::recorder::{AudioSource, MockAudioSource, MockFeed};
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Opens capture and playback devices.
pub trait AudioBackend: Send + Sync {
    /// Open an input device; the returned source is not started yet.
    fn open_input(&self, device: Option<&str>) -> Result<Box<dyn AudioSource>>;

    /// Open the output device used for speech and cues.
    fn open_output(&self) -> Result<Arc<dyn AudioOutput>>;
}

/// Real devices through CPAL.
#[cfg(feature = "cpal-audio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend {
    pub sample_rate: u32,
}

#[cfg(feature = "cpal-audio")]
impl CpalBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

#[cfg(feature = "cpal-audio")]
impl AudioBackend for CpalBackend {
    fn open_input(&self, device: Option<&str>) -> Result<Box<dyn AudioSource>> {
        let source = crate::audio::capture::CpalAudioSource::new(device)?
            .with_sample_rate(self.sample_rate);
        Ok(Box::new(source))
    }

    fn open_output(&self) -> Result<Arc<dyn AudioOutput>> {
        Ok(Arc::new(crate::audio::speaker::CpalAudioOutput::new()?))
    }
}

/// Backend handing out mock devices, for tests and headless runs.
///
/// All inputs opened from one backend read the same [`MockFeed`], and all
/// outputs are the same [`MockAudioOutput`].
#[derive(Clone)]
pub struct MockAudioBackend {
    feed: MockFeed,
    output: Arc<MockAudioOutput>,
    input_opens: Arc<AtomicUsize>,
    output_opens: Arc<AtomicUsize>,
    live_inputs: Arc<AtomicUsize>,
    deny_input: Arc<AtomicBool>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::with_output(MockAudioOutput::new())
    }

    pub fn with_output(output: MockAudioOutput) -> Self {
        Self {
            feed: MockFeed::new(),
            output: Arc::new(output),
            input_opens: Arc::new(AtomicUsize::new(0)),
            output_opens: Arc::new(AtomicUsize::new(0)),
            live_inputs: Arc::new(AtomicUsize::new(0)),
            deny_input: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every following input start fail with `PermissionDenied`.
    pub fn set_input_denied(&self, denied: bool) {
        self.deny_input.store(denied, Ordering::SeqCst);
    }

    pub fn feed(&self) -> MockFeed {
        self.feed.clone()
    }

    pub fn output(&self) -> Arc<MockAudioOutput> {
        Arc::clone(&self.output)
    }

    /// Number of times an input device was opened.
    pub fn input_opens(&self) -> usize {
        self.input_opens.load(Ordering::SeqCst)
    }

    pub fn output_opens(&self) -> usize {
        self.output_opens.load(Ordering::SeqCst)
    }

    /// Input devices currently started and not yet released.
    pub fn live_inputs(&self) -> usize {
        self.live_inputs.load(Ordering::SeqCst)
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockAudioBackend {
    fn open_input(&self, _device: Option<&str>) -> Result<Box<dyn AudioSource>> {
        self.input_opens.fetch_add(1, Ordering::SeqCst);

        let mut source = MockAudioSource::new()
            .with_feed(self.feed.clone())
            .with_live_counter(Arc::clone(&self.live_inputs));
        if self.deny_input.load(Ordering::SeqCst) {
            source = source
                .with_start_failure()
                .with_error_message("microphone permission was not granted");
        }
        Ok(Box::new(source))
    }

    fn open_output(&self) -> Result<Arc<dyn AudioOutput>> {
        self.output_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.output) as Arc<dyn AudioOutput>)
    }
}
