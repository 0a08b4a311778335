//! Microphone capture for a session.
//!
//! A poll task drains the input device into a [`CaptureBuffer`] until the
//! session flushes it. While muted, drained samples are dropped at the gate
//! so nothing captured during mute is ever sent. With endpointing on, quiet
//! before speech only fills a short pre-roll window.

use crate::audio::backend::AudioBackend;
use crate::audio::recorder::AudioSource;
use crate::audio::vad::{Vad, VadConfig, VadEvent, VadState};
use crate::config::AudioConfig;
use crate::defaults;
use crate::error::{Result, VocalisError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capture settings derived from `[audio]` config.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub vad: VadConfig,
    /// Emit `UtteranceEnded` when the VAD sees trailing silence
    pub auto_endpoint: bool,
    /// Silence kept ahead of detected speech, in milliseconds
    pub pre_roll_ms: u32,
    pub poll_interval: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&AudioConfig::default())
    }
}

impl CaptureSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            device: config.device.clone(),
            sample_rate: config.sample_rate,
            vad: VadConfig {
                speech_threshold: config.vad_threshold,
                silence_duration_ms: config.silence_duration_ms,
                min_speech_ms: defaults::MIN_SPEECH_MS,
            },
            auto_endpoint: config.auto_endpoint,
            pre_roll_ms: defaults::PRE_ROLL_MS,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The speaker paused long enough to close an utterance.
    UtteranceEnded,
}

/// Ordered chunks captured since the last flush.
///
/// Chunks heard before speech starts go to a bounded pre-roll instead, which
/// only keeps the most recent `pre_roll_limit` samples. Pre-roll is always
/// newer than the committed chunks, so [`take`](Self::take) appends it last.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    chunks: Vec<Vec<i16>>,
    pre_roll: VecDeque<Vec<i16>>,
    pre_roll_samples: usize,
    pre_roll_limit: usize,
}

impl CaptureBuffer {
    pub fn with_pre_roll(limit: usize) -> Self {
        Self {
            pre_roll_limit: limit,
            ..Self::default()
        }
    }

    pub fn push(&mut self, chunk: Vec<i16>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Hold a chunk that may precede speech, dropping the oldest held chunks
    /// once the window is full.
    pub fn push_pre_roll(&mut self, chunk: Vec<i16>) {
        if chunk.is_empty() {
            return;
        }
        self.pre_roll_samples += chunk.len();
        self.pre_roll.push_back(chunk);
        while let Some(front) = self.pre_roll.front()
            && self.pre_roll_samples - front.len() >= self.pre_roll_limit
        {
            self.pre_roll_samples -= front.len();
            self.pre_roll.pop_front();
        }
    }

    /// Speech started: the held pre-roll becomes part of the utterance.
    pub fn commit_pre_roll(&mut self) {
        self.chunks.extend(self.pre_roll.drain(..));
        self.pre_roll_samples = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.pre_roll.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() + self.pre_roll_samples
    }

    /// Concatenate every chunk in arrival order and clear the buffer.
    pub fn take(&mut self) -> Vec<i16> {
        let mut merged = Vec::with_capacity(self.sample_count());
        for chunk in self.chunks.drain(..).chain(self.pre_roll.drain(..)) {
            merged.extend(chunk);
        }
        self.pre_roll_samples = 0;
        merged
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pre_roll.clear();
        self.pre_roll_samples = 0;
    }
}

/// Encode samples for the wire: little-endian f32 in -1.0..1.0, base64.
///
/// An empty slice encodes to an empty string.
pub fn encode_samples(samples: &[i16]) -> String {
    if samples.is_empty() {
        return String::new();
    }
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| (s as f32 / i16::MAX as f32).to_le_bytes())
        .collect();
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_samples`].
pub fn decode_samples(payload: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| VocalisError::Decode {
            message: format!("invalid base64 audio: {}", e),
        })?;
    if bytes.len() % 4 != 0 {
        return Err(VocalisError::Decode {
            message: format!("audio payload of {} bytes is not whole f32 samples", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

struct CaptureState {
    source: Option<Box<dyn AudioSource>>,
    buffer: CaptureBuffer,
    vad: Vad,
}

struct Shared {
    state: Mutex<CaptureState>,
    muted: AtomicBool,
    auto_endpoint: bool,
}

impl Shared {
    /// Move whatever the device has into the buffer.
    fn pump(&self) -> Option<CaptureEvent> {
        let mut state = self.state.lock().ok()?;
        let source = state.source.as_mut()?;
        let samples = match source.read_samples() {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Capture read failed: {}", e);
                return None;
            }
        };

        if samples.is_empty() || self.muted.load(Ordering::SeqCst) {
            return None;
        }

        if !self.auto_endpoint {
            state.buffer.push(samples);
            return None;
        }

        let event = state.vad.process(&samples);
        match event {
            VadEvent::SpeechStart => {
                state.buffer.commit_pre_roll();
                state.buffer.push(samples);
            }
            VadEvent::Silence if state.vad.state() == VadState::Idle => {
                state.buffer.push_pre_roll(samples);
            }
            _ => state.buffer.push(samples),
        }
        (event == VadEvent::SpeechEnd).then_some(CaptureEvent::UtteranceEnded)
    }
}

/// Owns the input device for the lifetime of one capture.
pub struct CapturePipeline {
    backend: Arc<dyn AudioBackend>,
    settings: CaptureSettings,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        settings: CaptureSettings,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(CaptureState {
                source: None,
                buffer: CaptureBuffer::with_pre_roll(
                    settings.pre_roll_ms as usize * settings.sample_rate as usize / 1000,
                ),
                vad: Vad::new(settings.vad, settings.sample_rate),
            }),
            muted: AtomicBool::new(false),
            auto_endpoint: settings.auto_endpoint,
        });
        let pipeline = Self {
            backend,
            settings,
            shared,
            events,
            task: None,
        };
        (pipeline, events_rx)
    }

    /// Acquire a fresh input device and start draining it.
    ///
    /// Starts unmuted with an empty buffer. Calling it while already active
    /// is a no-op.
    ///
    /// # Errors
    /// `PermissionDenied` or `AudioDeviceNotFound`/`AudioCapture` from the
    /// device; the pipeline stays inactive.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let device = self.settings.device.clone();
        let source = tokio::task::spawn_blocking(move || -> Result<Box<dyn AudioSource>> {
            let mut source = backend.open_input(device.as_deref())?;
            source.start()?;
            Ok(source)
        })
        .await
        .map_err(|e| VocalisError::AudioCapture {
            message: format!("device open task failed: {}", e),
        })??;

        {
            let mut state = self.lock_state()?;
            state.buffer.clear();
            state.vad.reset();
            state.source = Some(source);
        }
        self.shared.muted.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let interval = self.settings.poll_interval;
        self.task = Some(tokio::spawn(poll_loop(shared, interval, events)));

        tracing::debug!("Capture started");
        Ok(())
    }

    /// Release the device and return the final payload.
    ///
    /// Returns an empty string when nothing was buffered or capture is muted.
    pub fn stop(&mut self) -> String {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Collect what the device captured since the last poll
        self.shared.pump();

        let (source, samples) = match self.shared.state.lock() {
            Ok(mut state) => {
                state.vad.reset();
                (state.source.take(), state.buffer.take())
            }
            Err(_) => (None, Vec::new()),
        };

        if let Some(mut source) = source {
            if let Err(e) = source.stop() {
                tracing::warn!("Failed to stop capture device: {}", e);
            }
            drop(source);
            tracing::debug!("Capture stopped");
        }

        if self.is_muted() {
            return String::new();
        }
        encode_samples(&samples)
    }

    /// Encode and clear everything captured since the last flush.
    ///
    /// Returns an empty string when muted or when the buffer is empty.
    pub fn flush(&self) -> String {
        if self.is_muted() {
            return String::new();
        }
        let samples = match self.shared.state.lock() {
            Ok(mut state) => state.buffer.take(),
            Err(_) => return String::new(),
        };
        encode_samples(&samples)
    }

    /// Drain the device once, outside the poll schedule.
    pub fn pump(&self) -> Option<CaptureEvent> {
        self.shared.pump()
    }

    pub fn mute(&self) {
        self.shared.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.vad.reset();
        }
        self.shared.muted.store(false, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Whether an input device is currently held.
    pub fn is_active(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|s| s.source.is_some())
            .unwrap_or(false)
    }

    pub fn buffered_samples(&self) -> usize {
        self.shared
            .state
            .lock()
            .map(|s| s.buffer.sample_count())
            .unwrap_or(0)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, CaptureState>> {
        self.shared.state.lock().map_err(|e| VocalisError::AudioCapture {
            message: format!("Failed to lock capture state: {}", e),
        })
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.is_active() {
            self.stop();
        }
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    interval: Duration,
    events: mpsc::UnboundedSender<CaptureEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Some(event) = shared.pump()
            && events.send(event).is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::MockAudioBackend;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            device: None,
            sample_rate: 16000,
            vad: VadConfig {
                speech_threshold: 0.02,
                silence_duration_ms: 100,
                min_speech_ms: 50,
            },
            auto_endpoint: true,
            pre_roll_ms: 300,
            // Long enough that tests drive the pump themselves
            poll_interval: Duration::from_secs(3600),
        }
    }

    fn pipeline(backend: &MockAudioBackend) -> (CapturePipeline, mpsc::UnboundedReceiver<CaptureEvent>) {
        CapturePipeline::new(Arc::new(backend.clone()), settings())
    }

    #[test]
    fn test_buffer_take_concatenates_in_order() {
        let mut buffer = CaptureBuffer::default();
        buffer.push(vec![1, 2]);
        buffer.push(vec![]);
        buffer.push(vec![3]);

        assert_eq!(buffer.sample_count(), 3);
        assert_eq!(buffer.take(), vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encode_samples_is_f32_le_base64() {
        let payload = encode_samples(&[0, i16::MAX, -i16::MAX]);
        assert_eq!(decode_samples(&payload).unwrap(), vec![0.0, 1.0, -1.0]);
        assert_eq!(encode_samples(&[]), "");
    }

    #[test]
    fn test_decode_samples_rejects_partial_floats() {
        let payload = STANDARD.encode([0u8, 0, 0]);
        assert!(decode_samples(&payload).is_err());
    }

    #[tokio::test]
    async fn test_flush_returns_captured_audio_then_empties() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);
        capture.start().await.unwrap();

        backend.feed().push(vec![100; 160]);
        backend.feed().push(vec![200; 160]);
        capture.pump();

        let samples = decode_samples(&capture.flush()).unwrap();
        assert_eq!(samples.len(), 320);
        assert_eq!(capture.flush(), "");

        capture.stop();
    }

    #[tokio::test]
    async fn test_muted_samples_never_reach_the_buffer() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);
        capture.start().await.unwrap();

        capture.mute();
        backend.feed().push(vec![500; 320]);
        capture.pump();
        assert_eq!(capture.flush(), "", "flush while muted is empty");
        assert_eq!(capture.buffered_samples(), 0);

        capture.unmute();
        assert_eq!(capture.flush(), "", "muted samples were dropped, not held");

        backend.feed().push(vec![500; 160]);
        capture.pump();
        assert_eq!(decode_samples(&capture.flush()).unwrap().len(), 160);
    }

    #[tokio::test]
    async fn test_stop_returns_final_payload_and_releases_device() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);
        capture.start().await.unwrap();
        assert_eq!(backend.live_inputs(), 1);

        backend.feed().push(vec![42; 80]);
        capture.pump();

        let payload = capture.stop();
        assert_eq!(decode_samples(&payload).unwrap().len(), 80);
        assert!(!capture.is_active());
        assert_eq!(backend.live_inputs(), 0);
    }

    #[tokio::test]
    async fn test_every_start_opens_a_fresh_device() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);

        capture.start().await.unwrap();
        capture.start().await.unwrap();
        assert_eq!(backend.input_opens(), 1, "start while active is a no-op");

        capture.stop();
        capture.start().await.unwrap();
        assert_eq!(backend.input_opens(), 2);
        assert_eq!(backend.live_inputs(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_pipeline_inactive() {
        let backend = MockAudioBackend::new();
        backend.set_input_denied(true);
        let (mut capture, _events) = pipeline(&backend);

        let result = capture.start().await;

        assert!(matches!(result, Err(VocalisError::PermissionDenied { .. })));
        assert!(!capture.is_active());
        assert_eq!(backend.live_inputs(), 0);
    }

    #[tokio::test]
    async fn test_trailing_silence_ends_utterance() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);
        capture.start().await.unwrap();

        backend.feed().push(vec![3000; 1600]);
        assert_eq!(capture.pump(), None);
        backend.feed().push(vec![0; 1600]);
        assert_eq!(capture.pump(), Some(CaptureEvent::UtteranceEnded));

        // Silence is part of the utterance payload
        assert_eq!(decode_samples(&capture.flush()).unwrap().len(), 3200);
    }

    #[test]
    fn test_pre_roll_keeps_only_the_newest_window() {
        let mut buffer = CaptureBuffer::with_pre_roll(300);
        for value in 1..=5 {
            buffer.push_pre_roll(vec![value; 100]);
        }
        assert_eq!(buffer.sample_count(), 300);

        buffer.commit_pre_roll();
        buffer.push(vec![9; 10]);
        let merged = buffer.take();
        assert_eq!(merged.len(), 310);
        assert_eq!(merged[0], 3);
        assert_eq!(merged[309], 9);
    }

    #[tokio::test]
    async fn test_silence_before_speech_is_bounded() {
        let backend = MockAudioBackend::new();
        let (mut capture, _events) = pipeline(&backend);
        capture.start().await.unwrap();

        // A minute of room noise in 100ms reads
        for _ in 0..600 {
            backend.feed().push(vec![0; 1600]);
            assert_eq!(capture.pump(), None);
        }
        assert_eq!(capture.buffered_samples(), 4800, "only 300ms of pre-roll is held");

        backend.feed().push(vec![3000; 1600]);
        capture.pump();
        backend.feed().push(vec![0; 1600]);
        assert_eq!(capture.pump(), Some(CaptureEvent::UtteranceEnded));

        let payload = decode_samples(&capture.flush()).unwrap();
        assert_eq!(payload.len(), 4800 + 1600 + 1600);
        assert_eq!(payload[4799], 0.0);
        assert!((payload[4800] - 3000.0 / i16::MAX as f32).abs() < 1e-6);
        assert_eq!(capture.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn test_poll_task_forwards_endpoint_events() {
        let backend = MockAudioBackend::new();
        let mut fast = settings();
        fast.poll_interval = Duration::from_millis(5);
        let (mut capture, mut events) = CapturePipeline::new(Arc::new(backend.clone()), fast);
        capture.start().await.unwrap();

        backend.feed().push(vec![3000; 1600]);
        backend.feed().push(vec![0; 1600]);
        // If both chunks land in one read they only open the utterance
        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.feed().push(vec![0; 1600]);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert_eq!(event.unwrap(), Some(CaptureEvent::UtteranceEnded));
    }
}
