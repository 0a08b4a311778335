//! Client side of a running session.
//!
//! A [`SessionHandle`] queues actions for the controller task and reads back
//! its events and latest snapshot.

use crate::audio::backend::AudioBackend;
use crate::config::Config;
use crate::error::{Result, VocalisError};
use crate::session::controller::{self, SessionAction};
use crate::session::document::Document;
use crate::session::state::{DocumentKind, Session, SessionEvent, VoiceState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Cloneable front end to a running session controller.
///
/// Actions are queued and handled in order; their effects show up as
/// [`SessionEvent`]s and in [`SessionHandle::snapshot`].
#[derive(Clone)]
pub struct SessionHandle {
    actions: mpsc::Sender<SessionAction>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<Session>,
}

impl SessionHandle {
    pub(crate) fn new(
        actions: mpsc::Sender<SessionAction>,
        events: broadcast::Sender<SessionEvent>,
        snapshot: watch::Receiver<Session>,
    ) -> Self {
        Self {
            actions,
            events,
            snapshot,
        }
    }

    /// Spawn a controller on the current tokio runtime.
    pub fn spawn(config: Config, backend: Arc<dyn AudioBackend>) -> Self {
        controller::spawn(config, backend)
    }

    async fn dispatch(&self, action: SessionAction) -> Result<()> {
        self.actions
            .send(action)
            .await
            .map_err(|_| VocalisError::Session {
                message: "session engine has shut down".to_string(),
            })
    }

    /// Connect, open the microphone and greet the assistant.
    pub async fn start(&self) -> Result<()> {
        self.dispatch(SessionAction::Start).await
    }

    pub async fn mute(&self) -> Result<()> {
        self.dispatch(SessionAction::SetMuted(true)).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.dispatch(SessionAction::SetMuted(false)).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.dispatch(SessionAction::ToggleMute).await
    }

    /// Cut the assistant off mid-reply.
    pub async fn stop_speaking(&self) -> Result<()> {
        self.dispatch(SessionAction::StopSpeaking).await
    }

    /// Send what the microphone captured so far as one utterance.
    pub async fn send_utterance(&self) -> Result<()> {
        self.dispatch(SessionAction::SendUtterance).await
    }

    pub async fn end(&self) -> Result<()> {
        self.dispatch(SessionAction::End).await
    }

    /// Read a file and send it to the assistant.
    ///
    /// Starts the session first if needed and resolves once the document has
    /// been handed to the connection.
    ///
    /// # Errors
    /// `Upload` if the file cannot be read or is not valid; `Session` if the
    /// session could not be started.
    pub async fn send_document(&self, path: &Path, kind: DocumentKind) -> Result<()> {
        let document = Document::read(path, kind).await?;
        self.submit_document(document).await
    }

    pub async fn submit_document(&self, document: Document) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.dispatch(SessionAction::SendDocument { document, reply })
            .await?;
        response.await.map_err(|_| VocalisError::Session {
            message: "session engine dropped the document".to_string(),
        })?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> VoiceState {
        self.snapshot.borrow().state
    }

    /// Wait until the snapshot satisfies `predicate`, or give up after `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Option<Session>
    where
        F: FnMut(&Session) -> bool,
    {
        let mut snapshot = self.snapshot.clone();
        let waited = tokio::time::timeout(timeout, async {
            snapshot
                .wait_for(|s| predicate(s))
                .await
                .map(|s| s.clone())
                .ok()
        })
        .await;
        waited.ok().flatten()
    }

    pub async fn wait_for_state(&self, state: VoiceState, timeout: Duration) -> bool {
        self.wait_for(timeout, |s| s.state == state).await.is_some()
    }
}
