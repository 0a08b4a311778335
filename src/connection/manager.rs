//! WebSocket connection manager.
//!
//! One background task per connection owns the socket. Outbound frames reach it
//! through an unbounded channel; inbound frames are parsed and fanned out to
//! subscribers in arrival order. Every connection carries a generation number so
//! that a replaced or closed connection can no longer publish status or messages.
//! Deliveries carry it too, because a message can already be queued for a
//! subscriber when its connection is closed.

use crate::connection::protocol::{Inbound, Outbound};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Per-subscriber queue depth before the reader applies backpressure.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Readiness of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Closed,
    Opening,
    Open,
}

/// An inbound message and the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub generation: u64,
    pub message: Inbound,
}

struct Shared {
    generation: Mutex<u64>,
    status: watch::Sender<ConnectionStatus>,
    subscribers: Mutex<Vec<mpsc::Sender<Delivery>>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation
            .lock()
            .map(|g| *g == generation)
            .unwrap_or(false)
    }

    /// Publish a status change unless the connection has been superseded.
    fn publish(&self, generation: u64, status: ConnectionStatus) {
        if let Ok(current) = self.generation.lock()
            && *current == generation
        {
            self.status.send_replace(status);
        }
    }

    async fn dispatch(&self, generation: u64, text: &str) {
        let message = match Inbound::from_json(text) {
            Ok(Inbound::Unknown) => {
                debug!("ignoring inbound message with unknown type");
                return;
            }
            Ok(message) => message,
            Err(e) => {
                warn!("ignoring malformed inbound message: {}", e);
                return;
            }
        };

        if !self.is_current(generation) {
            return;
        }

        let subscribers: Vec<_> = match self.subscribers.lock() {
            Ok(subs) => subs.clone(),
            Err(_) => return,
        };
        let mut closed = false;
        for tx in &subscribers {
            let delivery = Delivery {
                generation,
                message: message.clone(),
            };
            if tx.send(delivery).await.is_err() {
                closed = true;
            }
        }
        if closed && let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| !tx.is_closed());
        }
    }
}

/// Sending half of the live connection.
struct Live {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Owns the persistent connection to the assistant backend.
pub struct ConnectionManager {
    url: String,
    keepalive: Option<Duration>,
    shared: Arc<Shared>,
    live: Mutex<Option<Live>>,
}

impl ConnectionManager {
    /// Create a manager for `url`. Nothing is opened until [`connect`](Self::connect).
    pub fn new(url: impl Into<String>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        Self {
            url: url.into(),
            keepalive: None,
            shared: Arc::new(Shared {
                generation: Mutex::new(0),
                status,
                subscribers: Mutex::new(Vec::new()),
            }),
            live: Mutex::new(None),
        }
    }

    /// Send a `ping` on this interval while the connection is open.
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Follow status changes of whichever connection is current.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Whether `generation` is still the live connection.
    ///
    /// False for every delivery that arrived before the last `connect` or
    /// `disconnect`.
    pub fn is_current(&self, generation: u64) -> bool {
        self.shared.is_current(generation)
    }

    /// Open a new connection, replacing any open or opening one.
    ///
    /// Returns immediately; the handshake runs in a background task. Must be
    /// called from within a Tokio runtime.
    pub fn connect(&self) {
        let generation = self.bump_generation();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        // Dropping the previous sender makes its task close the socket.
        if let Ok(mut live) = self.live.lock() {
            *live = Some(Live {
                generation,
                outbound,
            });
        }
        self.shared.status.send_replace(ConnectionStatus::Opening);

        info!("connecting to {}", self.url);
        tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            generation,
            self.url.clone(),
            outbound_rx,
            self.keepalive,
        ));
    }

    /// Resolve `true` once the connection is open, `false` if `timeout` elapses first.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.status.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionStatus::Open)).await,
            Ok(Ok(_))
        )
    }

    /// Fire-and-forget send. Dropped when the connection is not open.
    ///
    /// Returns whether the message was handed to the socket task.
    pub fn send(&self, message: &Outbound) -> bool {
        if self.status() != ConnectionStatus::Open {
            debug!("dropping {} message: connection not open", message.kind());
            return false;
        }

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize {} message: {}", message.kind(), e);
                return false;
            }
        };

        let Ok(live) = self.live.lock() else {
            return false;
        };
        match live.as_ref() {
            Some(live) => live.outbound.send(Message::Text(json)).is_ok(),
            None => false,
        }
    }

    /// Register a subscriber. Each inbound message is delivered once, in arrival order.
    ///
    /// Subscriptions survive reconnects; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Close the connection. Safe to call when already closed.
    pub fn disconnect(&self) {
        let previous = self.live.lock().ok().and_then(|mut live| live.take());
        if let Some(live) = previous {
            debug!("disconnecting connection #{}", live.generation);
        }
        self.bump_generation();
        self.shared.status.send_replace(ConnectionStatus::Closed);
    }

    fn bump_generation(&self) -> u64 {
        match self.shared.generation.lock() {
            Ok(mut g) => {
                *g += 1;
                *g
            }
            Err(_) => 0,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn next_ping(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    keepalive: Option<Duration>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            warn!("connection #{} to {} failed: {}", generation, url, e);
            shared.publish(generation, ConnectionStatus::Closed);
            return;
        }
    };

    info!("connection #{} open", generation);
    shared.publish(generation, ConnectionStatus::Open);

    let (mut sink, mut stream) = socket.split();
    let mut ping = keepalive.map(|period| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });
    let ping_json = Outbound::Ping.to_json().unwrap_or_default();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(generation, &text).await,
                Some(Ok(Message::Close(_))) | None => {
                    info!("connection #{} closed by server", generation);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("connection #{} read error: {}", generation, e);
                    break;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!("connection #{} write error: {}", generation, e);
                        break;
                    }
                }
                None => {
                    if let Err(e) = sink.close().await {
                        debug!("connection #{} close: {}", generation, e);
                    }
                    break;
                }
            },
            _ = next_ping(&mut ping) => {
                if let Err(e) = sink.send(Message::Text(ping_json.clone())).await {
                    warn!("connection #{} keep-alive failed: {}", generation, e);
                    break;
                }
            }
        }
    }

    shared.publish(generation, ConnectionStatus::Closed);
}
