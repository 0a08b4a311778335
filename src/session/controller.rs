//! The session state machine.
//!
//! One actor task owns the connection, both pipelines, the cue synthesizer
//! and the output device. User actions, inbound messages, pipeline events and
//! timers reach it over channels and are handled one at a time, so no two
//! handlers ever interleave.

use crate::audio::backend::AudioBackend;
use crate::audio::output::AudioOutput;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionStatus, Delivery, Inbound, Outbound};
use crate::defaults;
use crate::error::{Result, VocalisError};
use crate::pipeline::capture::{CaptureEvent, CapturePipeline, CaptureSettings};
use crate::pipeline::cue::{Cue, CueSynthesizer};
use crate::pipeline::playback::{PlaybackEvent, PlaybackPipeline};
use crate::session::document::Document;
use crate::session::handle::SessionHandle;
use crate::session::state::{Session, SessionEvent, VoiceState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

const ACTION_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

const CONNECT_FAILED: &str = "Could not connect to assistant service";
const CONNECTION_LOST: &str = "Lost connection to assistant service";
const STOPPED_SPEAKING: &str = "Assistant stopped speaking.";
const MIC_MUTED: &str = "Microphone Muted";
const MIC_ACTIVE: &str = "Microphone Active";

/// Requests from a [`SessionHandle`].
pub(crate) enum SessionAction {
    Start,
    SetMuted(bool),
    ToggleMute,
    StopSpeaking,
    SendUtterance,
    End,
    SendDocument {
        document: Document,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Result of one start sequence, tagged so a cancelled attempt is ignored.
struct ConnectOutcome {
    attempt: u64,
    opened: bool,
}

struct PendingDocument {
    document: Document,
    reply: oneshot::Sender<Result<()>>,
}

/// Start a controller on the current runtime and return a handle to it.
///
/// The controller runs until every handle has been dropped.
pub fn spawn(config: Config, backend: Arc<dyn AudioBackend>) -> SessionHandle {
    let (actions_tx, actions_rx) = mpsc::channel(ACTION_QUEUE);
    let (events, _) = broadcast::channel(EVENT_QUEUE);
    let (snapshot_tx, snapshot_rx) = watch::channel(Session::default());

    let controller = SessionController::new(config, backend, events.clone(), snapshot_tx);
    tokio::spawn(controller.run(actions_rx));

    SessionHandle::new(actions_tx, events, snapshot_rx)
}

struct SessionController {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    connection: Arc<ConnectionManager>,
    inbound: mpsc::Receiver<Delivery>,
    connection_status: watch::Receiver<ConnectionStatus>,
    capture: CapturePipeline,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    playback: PlaybackPipeline,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    cues: CueSynthesizer,
    output: Option<Arc<dyn AudioOutput>>,
    session: Session,
    snapshot: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcomes: mpsc::UnboundedReceiver<ConnectOutcome>,
    /// Current start attempt; bumping it cancels a connect in flight
    attempt: Arc<AtomicU64>,
    revert_at: Option<Instant>,
    speaking_turn: Option<u64>,
    pending_document: Option<PendingDocument>,
}

impl SessionController {
    fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        events: broadcast::Sender<SessionEvent>,
        snapshot: watch::Sender<Session>,
    ) -> Self {
        let connection = Arc::new(
            ConnectionManager::new(config.connection.url.clone())
                .with_keepalive(config.connection.keepalive()),
        );
        let inbound = connection.subscribe();
        let connection_status = connection.watch_status();
        let (capture, capture_events) = CapturePipeline::new(
            Arc::clone(&backend),
            CaptureSettings::from_config(&config.audio),
        );
        let (playback, playback_events) = PlaybackPipeline::new();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        let cues = CueSynthesizer::new(config.session.cues);

        Self {
            config,
            backend,
            connection,
            inbound,
            connection_status,
            capture,
            capture_events,
            playback,
            playback_events,
            cues,
            output: None,
            session: Session::default(),
            snapshot,
            events,
            outcomes_tx,
            outcomes,
            attempt: Arc::new(AtomicU64::new(0)),
            revert_at: None,
            speaking_turn: None,
            pending_document: None,
        }
    }

    async fn run(mut self, mut actions: mpsc::Receiver<SessionAction>) {
        loop {
            let revert_at = self.revert_at;
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => self.handle_action(action).await,
                    None => break,
                },
                Some(delivery) = self.inbound.recv() => self.handle_delivery(delivery).await,
                Ok(()) = self.connection_status.changed() => self.handle_connection_status().await,
                Some(outcome) = self.outcomes.recv() => self.handle_connect_outcome(outcome).await,
                Some(event) = self.playback_events.recv() => self.handle_playback_event(event),
                Some(event) = self.capture_events.recv() => self.handle_capture_event(event),
                _ = sleep_until(revert_at) => self.revert_to_idle(),
            }
            self.publish();
        }

        tracing::debug!("All session handles dropped, shutting down");
        self.stop_live(false).await;
        self.release_output();
    }

    async fn handle_action(&mut self, action: SessionAction) {
        match action {
            SessionAction::Start => self.start_session().await,
            SessionAction::SetMuted(muted) => self.set_muted(muted),
            SessionAction::ToggleMute => self.set_muted(!self.session.muted),
            SessionAction::StopSpeaking => self.stop_speaking().await,
            SessionAction::SendUtterance => {
                self.capture.pump();
                self.send_utterance();
            }
            SessionAction::End => self.end_session().await,
            SessionAction::SendDocument { document, reply } => {
                self.send_document(document, reply).await
            }
        }
    }

    async fn start_session(&mut self) {
        if self.session.state != VoiceState::Idle {
            tracing::debug!("Start ignored while {}", self.session.state);
            return;
        }

        self.revert_at = None;
        self.session.started = true;
        self.session.muted = false;
        self.set_state(VoiceState::Connecting);
        self.acquire_output().await;

        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.attempt);
        let connection = Arc::clone(&self.connection);
        let first = self.config.connection.first_timeout();
        let retry = self.config.connection.retry_timeout();
        let outcomes = self.outcomes_tx.clone();

        tokio::spawn(async move {
            connection.connect();
            let mut opened = connection.wait_for_open(first).await;
            if !opened && current.load(Ordering::SeqCst) == attempt {
                tracing::info!("No answer from assistant within {:?}, retrying", first);
                connection.connect();
                opened = connection.wait_for_open(retry).await;
            }
            let _ = outcomes.send(ConnectOutcome { attempt, opened });
        });
    }

    async fn handle_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let current = self.attempt.load(Ordering::SeqCst);
        if outcome.attempt != current || self.session.state != VoiceState::Connecting {
            tracing::debug!("Ignoring outcome of cancelled attempt {}", outcome.attempt);
            if outcome.opened && self.session.state == VoiceState::Idle {
                self.connection.disconnect();
            }
            return;
        }

        if !outcome.opened {
            self.fail_start(CONNECT_FAILED.to_string()).await;
            return;
        }

        if let Err(e) = self.capture.start().await {
            self.fail_start(e.to_string()).await;
            return;
        }

        self.connection.send(&Outbound::Greeting);
        self.set_state(VoiceState::Listening);
        self.play(defaults::CUE_SESSION_START);
        tracing::info!("Session live on {}", self.connection.url());

        if let Some(pending) = self.pending_document.take() {
            self.session.pending_upload = false;
            self.deliver_document(pending.document, pending.reply);
        }
    }

    async fn fail_start(&mut self, message: String) {
        tracing::warn!("Session start failed: {}", message);
        self.session.started = false;
        self.stop_live(false).await;
        if let Some(pending) = self.pending_document.take() {
            self.session.pending_upload = false;
            let _ = pending.reply.send(Err(VocalisError::Session {
                message: message.clone(),
            }));
        }
        self.enter_error(message);
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        if !self.connection.is_current(delivery.generation) {
            tracing::debug!(
                "Dropping message from closed connection #{}",
                delivery.generation
            );
            return;
        }
        self.handle_inbound(delivery.message).await;
    }

    /// The server went away while the session was live.
    async fn handle_connection_status(&mut self) {
        let status = *self.connection_status.borrow_and_update();
        let state = self.session.state;
        let live = matches!(
            state,
            VoiceState::Listening | VoiceState::Processing | VoiceState::Speaking
        );
        if status != ConnectionStatus::Closed || !live {
            return;
        }
        tracing::warn!("Connection closed while {}", state);
        self.stop_live(false).await;
        self.enter_error(CONNECTION_LOST.to_string());
    }

    async fn handle_inbound(&mut self, message: Inbound) {
        let state = self.session.state;
        match message {
            Inbound::Transcription { text } => {
                if !state.is_active() {
                    return;
                }
                self.session.transcript = text.clone();
                self.emit(SessionEvent::Transcript(text));
                if state == VoiceState::Listening {
                    self.set_state(VoiceState::Processing);
                    self.play(defaults::CUE_PROCESSING);
                }
            }
            Inbound::LlmResponse { text } => {
                if !state.is_active() {
                    return;
                }
                self.session.assistant_text = text.clone();
                self.emit(SessionEvent::AssistantText(text));
            }
            Inbound::TtsStart => match state {
                VoiceState::Listening | VoiceState::Processing => {
                    self.speaking_turn = Some(self.playback.begin_turn().await);
                    self.set_state(VoiceState::Speaking);
                    self.play(defaults::CUE_SPEAKING);
                }
                VoiceState::Speaking => {
                    self.speaking_turn = Some(self.playback.begin_turn().await);
                }
                _ => tracing::debug!("Speech start ignored while {}", state),
            },
            Inbound::TtsChunk { audio_chunk } => {
                if state == VoiceState::Speaking {
                    self.playback.play_chunk(audio_chunk);
                } else {
                    tracing::debug!("Speech chunk ignored while {}", state);
                }
            }
            Inbound::TtsEnd => {
                if state == VoiceState::Speaking {
                    self.playback.end_turn();
                }
            }
            Inbound::Status { message } => {
                if !state.is_active() {
                    return;
                }
                let back_to_listening = state == VoiceState::Processing
                    && message.contains(defaults::LISTENING_STATUS_MARKER);
                self.emit(SessionEvent::Status(message));
                if back_to_listening {
                    self.set_state(VoiceState::Listening);
                    self.play(defaults::CUE_LISTENING);
                }
            }
            Inbound::Error { message } => {
                if !state.is_active() {
                    tracing::debug!("Backend error ignored while {}: {}", state, message);
                    return;
                }
                tracing::warn!("Assistant reported an error: {}", message);
                self.stop_live(false).await;
                self.enter_error(message);
            }
            Inbound::Unknown => {}
        }
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        let PlaybackEvent::Complete { turn } = event;
        if self.session.state == VoiceState::Speaking && self.speaking_turn == Some(turn) {
            self.speaking_turn = None;
            self.resume_listening(defaults::CUE_LISTENING);
        }
    }

    fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::UtteranceEnded => self.send_utterance(),
        }
    }

    /// Flush the capture buffer to the backend as one utterance.
    fn send_utterance(&mut self) {
        if self.session.state != VoiceState::Listening || self.session.muted {
            return;
        }
        self.send_pending_audio();
    }

    fn send_pending_audio(&mut self) {
        let payload = self.capture.flush();
        if payload.is_empty() {
            return;
        }
        let bytes = payload.len();
        if self.connection.send(&Outbound::Audio {
            audio_data: payload,
        }) {
            self.emit(SessionEvent::UtteranceSent { bytes });
        }
    }

    fn set_muted(&mut self, muted: bool) {
        let state = self.session.state;
        if !state.allows_mute() {
            tracing::debug!("Mute ignored while {}", state);
            return;
        }
        if muted == self.session.muted {
            return;
        }

        if muted {
            // Close the utterance so nothing from before the mute is sent later.
            // Only `listening` sends it; the backend is busy with a turn otherwise.
            self.capture.pump();
            if state == VoiceState::Listening {
                self.send_pending_audio();
            } else {
                self.capture.flush();
            }
            self.capture.mute();
            self.play(defaults::CUE_MUTE);
        } else {
            self.capture.unmute();
            self.play(defaults::CUE_UNMUTE);
        }

        self.session.muted = muted;
        let text = if muted { MIC_MUTED } else { MIC_ACTIVE };
        self.session.assistant_text = text.to_string();
        self.emit(SessionEvent::MuteChanged(muted));
        self.emit(SessionEvent::AssistantText(text.to_string()));
    }

    async fn stop_speaking(&mut self) {
        if self.session.state != VoiceState::Speaking {
            tracing::debug!("Stop speaking ignored while {}", self.session.state);
            return;
        }
        self.speaking_turn = None;
        self.playback.interrupt().await;
        self.session.assistant_text = STOPPED_SPEAKING.to_string();
        self.emit(SessionEvent::AssistantText(STOPPED_SPEAKING.to_string()));
        self.resume_listening(defaults::CUE_STOP_SPEAKING);
    }

    /// Back to `listening` after a speech turn.
    fn resume_listening(&mut self, cue: Cue) {
        // Whatever the microphone heard meanwhile is the assistant's own voice
        self.capture.flush();
        self.set_state(VoiceState::Listening);
        self.play(cue);
    }

    async fn end_session(&mut self) {
        if self.session.state == VoiceState::Idle {
            tracing::debug!("End ignored while idle");
            return;
        }

        self.revert_at = None;
        self.stop_live(true).await;
        self.release_output();
        if let Some(pending) = self.pending_document.take() {
            let _ = pending.reply.send(Err(VocalisError::Session {
                message: "Session ended before the document was sent".to_string(),
            }));
        }
        self.reset_to_idle();
        tracing::info!("Session ended");
    }

    async fn send_document(&mut self, document: Document, reply: oneshot::Sender<Result<()>>) {
        match self.session.state {
            VoiceState::Listening | VoiceState::Processing | VoiceState::Speaking => {
                self.deliver_document(document, reply);
            }
            VoiceState::Connecting => self.hold_document(document, reply),
            VoiceState::Idle => {
                self.hold_document(document, reply);
                self.start_session().await;
            }
            VoiceState::Error => {
                let _ = reply.send(Err(VocalisError::Session {
                    message: "Assistant is recovering from an error, try again shortly"
                        .to_string(),
                }));
            }
        }
    }

    fn hold_document(&mut self, document: Document, reply: oneshot::Sender<Result<()>>) {
        if let Some(previous) = self.pending_document.take() {
            let _ = previous.reply.send(Err(VocalisError::Session {
                message: "Replaced by a newer document".to_string(),
            }));
        }
        tracing::debug!("Holding {} until the session is live", document.kind);
        self.pending_document = Some(PendingDocument { document, reply });
        self.session.pending_upload = true;
    }

    fn deliver_document(&mut self, document: Document, reply: oneshot::Sender<Result<()>>) {
        let kind = document.kind;
        if !self.connection.send(&document.to_message()) {
            let _ = reply.send(Err(VocalisError::Connection {
                message: "not connected to assistant service".to_string(),
            }));
            return;
        }

        let text = format!("Processing {}...", kind);
        self.session.assistant_text = text.clone();
        self.emit(SessionEvent::AssistantText(text));
        self.emit(SessionEvent::DocumentSent(kind));
        let _ = reply.send(Ok(()));
    }

    fn enter_error(&mut self, message: String) {
        self.session.assistant_text = message.clone();
        self.set_state(VoiceState::Error);
        self.emit(SessionEvent::Error(message));
        self.play(defaults::CUE_ERROR);
        let delay = Duration::from_millis(self.config.session.error_revert_ms);
        self.revert_at = Some(Instant::now() + delay);
    }

    fn revert_to_idle(&mut self) {
        self.revert_at = None;
        if self.session.state != VoiceState::Error {
            return;
        }
        self.release_output();
        self.reset_to_idle();
    }

    fn reset_to_idle(&mut self) {
        let from = self.session.state;
        self.session = Session::default();
        self.speaking_turn = None;
        if from != VoiceState::Idle {
            tracing::info!("Session {} -> idle", from);
            self.emit(SessionEvent::StateChanged {
                from,
                to: VoiceState::Idle,
            });
        }
    }

    /// Release everything live except the output device.
    ///
    /// Cancels any connect in flight. With `send_final`, the last captured
    /// audio goes out before the connection closes.
    async fn stop_live(&mut self, send_final: bool) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.speaking_turn = None;
        self.playback.interrupt().await;

        if self.capture.is_active() {
            let payload = self.capture.stop();
            if send_final && !payload.is_empty() && !self.session.muted {
                let bytes = payload.len();
                if self.connection.send(&Outbound::Audio {
                    audio_data: payload,
                }) {
                    self.emit(SessionEvent::UtteranceSent { bytes });
                }
            }
        }

        self.connection.disconnect();
    }

    async fn acquire_output(&mut self) {
        if self.output.is_some() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || backend.open_output()).await {
            Ok(Ok(output)) => {
                self.playback.attach(Arc::clone(&output));
                self.cues.attach(Arc::clone(&output));
                self.output = Some(output);
            }
            Ok(Err(e)) => tracing::warn!("No audio output, speech and cues disabled: {}", e),
            Err(e) => tracing::warn!("Output device task failed: {}", e),
        }
    }

    fn release_output(&mut self) {
        self.playback.detach();
        self.cues.detach();
        self.output = None;
    }

    fn play(&self, cue: Cue) {
        self.cues.play(cue);
    }

    fn set_state(&mut self, to: VoiceState) {
        let from = self.session.state;
        if from == to {
            return;
        }
        self.session.state = to;
        tracing::info!("Session {} -> {}", from, to);
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let session = &self.session;
        self.snapshot.send_if_modified(|current| {
            if current == session {
                false
            } else {
                *current = session.clone();
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
