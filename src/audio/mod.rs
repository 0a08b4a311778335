pub mod backend;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod output;
pub mod recorder;
#[cfg(feature = "cpal-audio")]
pub mod speaker;
pub mod vad;
pub mod wav;

pub use backend::{AudioBackend, MockAudioBackend};
pub use output::{AudioClip, AudioOutput, MockAudioOutput};
pub use recorder::{AudioSource, MockAudioSource, MockFeed};
