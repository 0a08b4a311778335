//! Speech playback, one turn at a time.
//!
//! Each turn gets a worker task that decodes and renders chunks strictly in
//! arrival order. A turn ends either when its sender is dropped and the last
//! chunk has played, or when it is interrupted. In both cases
//! `PlaybackEvent::Complete` is emitted exactly once.

use crate::audio::output::AudioOutput;
use crate::audio::wav::ChunkDecoder;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The turn with this id has finished or was interrupted.
    Complete { turn: u64 },
}

struct ActiveTurn {
    id: u64,
    chunks: Option<mpsc::UnboundedSender<String>>,
    completed: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

pub struct PlaybackPipeline {
    output: Option<Arc<dyn AudioOutput>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    turn: Option<ActiveTurn>,
    next_turn: u64,
}

impl PlaybackPipeline {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            output: None,
            events,
            turn: None,
            next_turn: 0,
        };
        (pipeline, events_rx)
    }

    pub fn attach(&mut self, output: Arc<dyn AudioOutput>) {
        self.output = Some(output);
    }

    pub fn detach(&mut self) {
        self.output = None;
    }

    /// Start a new turn and return its id.
    ///
    /// A turn still in progress is abandoned without a completion event.
    pub async fn begin_turn(&mut self) -> u64 {
        if let Some(old) = self.turn.take() {
            old.completed.store(true, Ordering::SeqCst);
            self.stop_worker(old).await;
            tracing::debug!("Abandoned unfinished speech turn");
        }

        self.next_turn += 1;
        let id = self.next_turn;
        let (chunks, chunks_rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_turn(
            id,
            chunks_rx,
            self.output.clone(),
            Arc::clone(&completed),
            self.events.clone(),
        ));

        self.turn = Some(ActiveTurn {
            id,
            chunks: Some(chunks),
            completed,
            worker,
        });
        id
    }

    /// Queue one base64 chunk behind everything already queued.
    pub fn play_chunk(&self, payload: String) {
        match self.turn.as_ref().and_then(|t| t.chunks.as_ref()) {
            Some(chunks) => {
                if chunks.send(payload).is_err() {
                    tracing::debug!("Speech worker gone, chunk dropped");
                }
            }
            None => tracing::debug!("No open speech turn, chunk dropped"),
        }
    }

    /// Mark the current turn as fully received.
    pub fn end_turn(&mut self) {
        if let Some(turn) = self.turn.as_mut() {
            turn.chunks = None;
        }
    }

    /// Stop the current turn at once.
    ///
    /// Emits `Complete` immediately unless the turn already completed.
    pub async fn interrupt(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        let id = turn.id;
        let already = turn.completed.swap(true, Ordering::SeqCst);
        self.stop_worker(turn).await;
        if !already {
            let _ = self.events.send(PlaybackEvent::Complete { turn: id });
        }
    }

    /// Id of the turn currently accepting or playing chunks.
    pub fn current_turn(&self) -> Option<u64> {
        self.turn
            .as_ref()
            .filter(|t| !t.completed.load(Ordering::SeqCst))
            .map(|t| t.id)
    }

    async fn stop_worker(&self, turn: ActiveTurn) {
        let ActiveTurn { worker, chunks, .. } = turn;
        drop(chunks);
        worker.abort();
        // Wait until the worker cannot queue more audio before halting
        let _ = worker.await;
        if let Some(output) = &self.output {
            output.halt();
        }
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.completed.store(true, Ordering::SeqCst);
            turn.worker.abort();
        }
    }
}

async fn run_turn(
    id: u64,
    mut chunks: mpsc::UnboundedReceiver<String>,
    output: Option<Arc<dyn AudioOutput>>,
    completed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let mut decoder = ChunkDecoder::new();
    let mut played = 0usize;

    while let Some(payload) = chunks.recv().await {
        if completed.load(Ordering::SeqCst) {
            return;
        }

        let bytes = match STANDARD.decode(payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Dropping speech chunk with invalid base64: {}", e);
                continue;
            }
        };

        let clip = match decoder.decode(&bytes) {
            Ok(Some(clip)) => clip,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Dropping undecodable speech chunk: {}", e);
                continue;
            }
        };

        match &output {
            Some(output) => {
                if let Err(e) = output.render(clip).await {
                    tracing::warn!("Speech chunk failed to play: {}", e);
                }
            }
            None => tracing::debug!("No output device, speech chunk skipped"),
        }
        played += 1;
    }

    tracing::debug!("Speech turn {} finished after {} chunks", id, played);
    if !completed.swap(true, Ordering::SeqCst) {
        let _ = events.send(PlaybackEvent::Complete { turn: id });
    }
}
