//! Capture device seam and its test double.

use crate::error::{Result, VocalisError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A microphone, real or mocked.
///
/// A source is opened stopped; the capture pipeline starts it, polls
/// `read_samples` and stops it when the session releases the microphone.
pub trait AudioSource: Send + Sync {
    fn start(&mut self) -> Result<()>;

    /// Release the device. Stopping a stopped source is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Take everything captured since the previous read, as 16-bit mono PCM
    /// at the capture rate. Empty when nothing new arrived.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Shared queue feeding a [`MockAudioSource`].
///
/// Tests keep a clone and push chunks as if a microphone had produced them.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    chunks: Arc<Mutex<VecDeque<Vec<i16>>>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk of "captured" samples.
    pub fn push(&self, samples: Vec<i16>) {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push_back(samples);
        }
    }

    /// Number of chunks not yet read.
    pub fn pending(&self) -> usize {
        self.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn drain(&self) -> Vec<i16> {
        match self.chunks.lock() {
            Ok(mut chunks) => chunks.drain(..).flatten().collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Scriptable microphone for tests.
///
/// Reads whatever was pushed to its [`MockFeed`] while started.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    feed: MockFeed,
    live: Arc<AtomicUsize>,
    counted: Arc<AtomicBool>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self {
            is_started: false,
            feed: MockFeed::new(),
            live: Arc::new(AtomicUsize::new(0)),
            counted: Arc::new(AtomicBool::new(false)),
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Read from a shared feed instead of a private one
    pub fn with_feed(mut self, feed: MockFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Count this source in a shared "devices currently held" counter
    pub fn with_live_counter(mut self, live: Arc<AtomicUsize>) -> Self {
        self.live = live;
        self
    }

    /// Refuse `start` with `PermissionDenied`
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Fail every `read_samples` with `AudioCapture`
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Message carried by the injected failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    fn release(&mut self) {
        self.is_started = false;
        if self.counted.swap(false, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockAudioSource {
    fn drop(&mut self) {
        // Clones share the counted flag; only the last one standing may release.
        if Arc::strong_count(&self.counted) == 1 {
            self.release();
        }
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(VocalisError::PermissionDenied {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        if !self.counted.swap(true, Ordering::SeqCst) {
            self.live.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(VocalisError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if !self.is_started {
            return Ok(Vec::new());
        }
        Ok(self.feed.drain())
    }
}
