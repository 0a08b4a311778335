//! Microphone capture using CPAL.
//!
//! The data callback appends 16-bit mono PCM to a shared [`SampleSink`];
//! `read_samples` drains it. Format negotiation prefers mono at the target
//! rate and falls back to the device's native config, converted in software.

use crate::audio::recorder::AudioSource;
use crate::audio::wav::{convert_to_mono, f32_to_i16};
use crate::defaults;
use crate::error::{Result, VocalisError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Suffix `list_devices` appends to preferred devices.
const RECOMMENDED_SUFFIX: &str = " [recommended]";

/// How long a fresh stream gets to deliver its first callback.
const FIRST_CALLBACK_GRACE: Duration = Duration::from_millis(200);

/// Name fragments of PipeWire/PulseAudio devices, which resample and mix for us.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Name fragments of devices that are never a microphone worth offering.
const IGNORED_DEVICES: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "digital output",
    "hdmi",
    "s/pdif",
];

/// Run a closure with fd 2 pointed at /dev/null.
///
/// CPAL backends print probe noise straight to stderr. Not safe against
/// another thread redirecting fd 2 at the same time.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: only file descriptors we opened or duplicated are closed, and
    // fd 2 is restored before returning.
    unsafe {
        let saved = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
        }
        if devnull >= 0 {
            libc::close(devnull);
        }

        let result = f();

        if saved >= 0 {
            libc::dup2(saved, 2);
            libc::close(saved);
        }
        result
    }
}

/// Keep JACK from auto-starting and quieten ALSA/PipeWire logging.
///
/// Call once at startup, before the runtime spawns threads.
pub fn suppress_audio_warnings() {
    // SAFETY: no other threads exist yet
    unsafe {
        for (key, value) in [
            ("JACK_NO_START_SERVER", "1"),
            ("JACK_NO_AUDIO_RESERVATION", "1"),
            ("PIPEWIRE_DEBUG", "0"),
            ("PW_LOG", "0"),
            ("ALSA_DEBUG", "0"),
        ] {
            std::env::set_var(key, value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceClass {
    Preferred,
    Usable,
    Ignored,
}

fn classify_device(name: &str) -> DeviceClass {
    let lower = name.to_lowercase();
    if IGNORED_DEVICES.iter().any(|p| lower.contains(p)) {
        DeviceClass::Ignored
    } else if PREFERRED_DEVICES.iter().any(|p| lower.contains(p)) {
        DeviceClass::Preferred
    } else {
        DeviceClass::Usable
    }
}

/// Map a CPAL failure to an error, recognising refused microphone access.
fn capture_error(context: &str, err: impl std::fmt::Display) -> VocalisError {
    let message = format!("{}: {}", context, err);
    let lower = message.to_lowercase();
    let refused = ["permission", "denied", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle));
    if refused {
        VocalisError::PermissionDenied { message }
    } else {
        VocalisError::AudioCapture { message }
    }
}

fn enumerate_error(err: impl std::fmt::Display) -> VocalisError {
    VocalisError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", err),
    }
}

/// Names of usable input devices; preferred ones carry a " \[recommended\]" suffix.
///
/// # Errors
/// `VocalisError::AudioCapture` if the host cannot enumerate devices.
pub fn list_devices() -> Result<Vec<String>> {
    let names = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(enumerate_error)?;
        Ok::<_, VocalisError>(devices.filter_map(|d| d.name().ok()).collect::<Vec<_>>())
    })?;

    Ok(names
        .into_iter()
        .filter_map(|name| match classify_device(&name) {
            DeviceClass::Ignored => None,
            DeviceClass::Preferred => Some(format!("{}{}", name, RECOMMENDED_SUFFIX)),
            DeviceClass::Usable => Some(name),
        })
        .collect())
}

/// Find an input device by exact name, or pick the best default.
///
/// Accepts names as printed by [`list_devices`], suffix included.
fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match name {
            Some(name) => {
                let wanted = name.strip_suffix(RECOMMENDED_SUFFIX).unwrap_or(name);
                host.input_devices()
                    .map_err(enumerate_error)?
                    .find(|d| d.name().is_ok_and(|n| n == wanted))
                    .ok_or_else(|| VocalisError::AudioDeviceNotFound {
                        device: name.to_string(),
                    })
            }
            None => {
                let preferred = host.input_devices().ok().and_then(|mut devices| {
                    devices.find(|d| {
                        d.name()
                            .is_ok_and(|n| classify_device(&n) == DeviceClass::Preferred)
                    })
                });
                preferred
                    .or_else(|| host.default_input_device())
                    .ok_or_else(|| VocalisError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    })
            }
        }
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: owners keep the stream behind a Mutex and only call its methods
/// synchronously.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Samples written by the CPAL callback, drained by the reader.
#[derive(Clone, Default)]
struct SampleSink {
    samples: Arc<Mutex<Vec<i16>>>,
    callbacks: Arc<AtomicU64>,
}

impl SampleSink {
    fn push(&self, samples: Vec<i16>) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut buf) = self.samples.lock() {
            buf.extend_from_slice(&samples);
        }
    }

    fn has_fired(&self) -> bool {
        self.callbacks.load(Ordering::Relaxed) > 0
    }

    fn reset(&self) {
        self.callbacks.store(0, Ordering::Relaxed);
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
    }

    fn drain(&self) -> Result<Vec<i16>> {
        let mut buf = self.samples.lock().map_err(|e| VocalisError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buf))
    }
}

fn f32_block_to_i16(data: &[f32]) -> Vec<i16> {
    data.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Microphone capture through CPAL, delivering 16-bit mono at `sample_rate`.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    sink: SampleSink,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open an input device by name, or the best default when `None`.
    ///
    /// # Errors
    /// Returns `VocalisError::AudioDeviceNotFound` when no device matches.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        Ok(Self {
            device: find_input_device(device_name)?,
            stream: Mutex::new(None),
            sink: SampleSink::default(),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
        self
    }

    fn stream_slot(&self) -> Result<MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| VocalisError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })
    }

    fn open_stream<T, F>(
        &self,
        config: &cpal::StreamConfig,
        convert: F,
        context: &str,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample,
        F: Fn(&[T]) -> Vec<i16> + Send + 'static,
    {
        let sink = self.sink.clone();
        self.device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| sink.push(convert(data)),
                |err| tracing::warn!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| capture_error(context, e))
    }

    /// Mono at the target rate as i16, then as f32, then the native config.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let mono = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        self.open_stream::<i16, _>(&mono, <[i16]>::to_vec, "Failed to build i16 stream")
            .or_else(|_| {
                self.open_stream::<f32, _>(&mono, f32_block_to_i16, "Failed to build f32 stream")
            })
            .or_else(|_| self.build_native_stream())
    }

    fn build_native_stream(&self) -> Result<cpal::Stream> {
        let native = self
            .device
            .default_input_config()
            .map_err(|e| capture_error("Failed to query default input config", e))?;
        let channels = native.channels() as usize;
        let rate = native.sample_rate().0;
        let target = self.sample_rate;
        let config: cpal::StreamConfig = native.config();

        tracing::info!(
            "Capturing at native {}ch/{}Hz/{:?}, converting to mono {}Hz",
            channels,
            rate,
            native.sample_format(),
            target
        );

        match native.sample_format() {
            cpal::SampleFormat::I16 => self.open_stream::<i16, _>(
                &config,
                move |data| convert_to_mono(data, channels, rate, target),
                "Failed to build native i16 stream",
            ),
            cpal::SampleFormat::F32 => self.open_stream::<f32, _>(
                &config,
                move |data| convert_to_mono(&f32_block_to_i16(data), channels, rate, target),
                "Failed to build native f32 stream",
            ),
            other => Err(VocalisError::AudioCapture {
                message: format!(
                    "Unsupported native sample format {:?}; pick another device with --device",
                    other
                ),
            }),
        }
    }

    fn play(stream: &cpal::Stream) -> Result<()> {
        stream
            .play()
            .map_err(|e| capture_error("Failed to start audio stream", e))
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream_slot()?.is_some() {
            return Ok(());
        }

        self.sink.reset();
        let mut stream = self.build_stream()?;
        Self::play(&stream)?;

        // Some PipeWire-ALSA setups accept a non-native config and then never
        // call back.
        std::thread::sleep(FIRST_CALLBACK_GRACE);
        if !self.sink.has_fired() {
            tracing::info!("Input stream silent, retrying with the native format");
            drop(stream);
            self.sink.reset();
            stream = self.build_native_stream()?;
            Self::play(&stream)?;
        }

        *self.stream_slot()? = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // Dropping the stream releases the device
        if let Some(SendableStream(stream)) = self.stream_slot()?.take() {
            stream
                .pause()
                .map_err(|e| capture_error("Failed to stop audio stream", e))?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        self.sink.drain()
    }
}
