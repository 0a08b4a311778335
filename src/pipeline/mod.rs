//! Audio pipelines driven by the session controller.

pub mod capture;
pub mod cue;
pub mod playback;

pub use capture::{CaptureEvent, CapturePipeline, CaptureSettings};
pub use cue::{Cue, CueSynthesizer, Waveform};
pub use playback::{PlaybackEvent, PlaybackPipeline};
