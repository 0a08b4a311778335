//! Voice session engine.

mod controller;
pub mod document;
pub mod handle;
pub mod state;

pub use document::Document;
pub use handle::SessionHandle;
pub use state::{DocumentKind, Session, SessionEvent, VoiceState};
