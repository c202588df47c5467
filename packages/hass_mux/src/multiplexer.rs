//! Upstream session lifecycle and client relay.
//!
//! One [`Multiplexer`] owns at most one upstream connection and the set of
//! clients sharing it. Two locks serialize everything that matters:
//!
//! - `connect_lock` is held for the whole of a connect attempt, so concurrent
//!   callers of [`Multiplexer::ensure_connected`] queue behind the first one
//!   and then find the session already live.
//! - `shared` guards the session state, the live session's sender and the
//!   active client set. It is never held across network I/O.
//!
//! Every live session gets a generation number. Events from the reader and
//! writer tasks of an older generation are ignored, and a client is only
//! registered against the generation it observed live.

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::endpoint::UpstreamConfig;
use crate::error::MuxError;
use crate::frame::{CloseNotice, Frame, Outbound, UPSTREAM_LOST_CODE};
use crate::metrics::MuxMetrics;
use crate::protocol::{ConnectionInfo, MuxStatus};
use crate::registry::{BroadcastReport, ClientId, ClientRegistry, ClientSession};
use crate::upstream::{self, UpstreamStream};

/// How many times `accept_client` re-drives a connect when a teardown races
/// its registration.
const ACCEPT_ATTEMPTS: usize = 3;

/// Upstream session lifecycle.
///
/// `Disconnected → Connecting → Live → Disconnected`; a failed attempt goes
/// straight back to `Disconnected`. There is no retry timer: the next
/// connect request drives the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Live,
}

struct LiveSession {
    generation: u64,
    /// Feeds the upstream writer task
    sender: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
}

struct Shared {
    state: SessionState,
    last_generation: u64,
    live: Option<LiveSession>,
    clients: ClientRegistry,
}

impl Shared {
    fn live_generation(&self) -> Option<u64> {
        self.live.as_ref().map(|live| live.generation)
    }
}

struct Inner {
    config: UpstreamConfig,
    connect_lock: Mutex<()>,
    shared: Mutex<Shared>,
    metrics: MuxMetrics,
    shutdown: CancellationToken,
}

/// Handle to one upstream target and its clients. Clones share the instance.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    /// Create an idle multiplexer. Nothing is opened until a client asks.
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connect_lock: Mutex::new(()),
                shared: Mutex::new(Shared {
                    state: SessionState::Disconnected,
                    last_generation: 0,
                    live: None,
                    clients: ClientRegistry::default(),
                }),
                metrics: MuxMetrics::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &MuxMetrics {
        &self.inner.metrics
    }

    pub async fn status(&self) -> MuxStatus {
        let shared = self.inner.shared.lock().await;
        MuxStatus {
            active_client_count: shared.clients.len(),
            upstream_live: shared.state == SessionState::Live,
        }
    }

    pub async fn session_state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Make sure an authenticated upstream session is live.
    ///
    /// Returns immediately when one already is. Failures are not retried
    /// here; they surface to the caller and the session stays disconnected.
    pub async fn ensure_connected(&self) -> Result<(), MuxError> {
        self.connect().await.map(|_| ())
    }

    /// Register a new downstream client.
    ///
    /// Drives [`Self::ensure_connected`] first and registers nothing if that
    /// fails. The returned session already holds a `connection_info` frame
    /// as its first outbound item.
    pub async fn accept_client(&self) -> Result<ClientSession, MuxError> {
        self.accept_with(|| self.connect()).await
    }

    /// Registration loop behind [`Self::accept_client`], with the connect
    /// step supplied by the caller.
    async fn accept_with<F, Fut>(&self, mut connect: F) -> Result<ClientSession, MuxError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<u64, MuxError>>,
    {
        for attempt in 1..=ACCEPT_ATTEMPTS {
            let generation = match connect().await {
                Ok(generation) => generation,
                Err(e) => {
                    MuxMetrics::incr(&self.inner.metrics.clients_rejected);
                    return Err(e);
                }
            };

            let mut shared = self.inner.shared.lock().await;
            if shared.live_generation() != Some(generation) {
                debug!(
                    attempt,
                    generation, "Upstream session ended before registration"
                );
                continue;
            }

            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            let info = ConnectionInfo {
                client_id: id,
                connected: shared.state == SessionState::Live,
            };
            // The receiver is alive, this cannot fail
            let _ = tx.send(Outbound::Frame(info.to_frame()?));
            shared.clients.insert(id, tx);
            MuxMetrics::incr(&self.inner.metrics.clients_accepted);

            info!(
                client = %id,
                generation,
                clients = shared.clients.len(),
                "Client registered"
            );
            return Ok(ClientSession::new(id, rx));
        }

        MuxMetrics::incr(&self.inner.metrics.clients_rejected);
        warn!("Giving up on client registration after {ACCEPT_ATTEMPTS} attempts");
        Err(MuxError::UpstreamUnavailable)
    }

    /// Relay a client frame upstream.
    ///
    /// Returns `false` when the frame was dropped: the client is no longer
    /// registered or no session is live. Dropping is silent for the client.
    pub async fn forward(&self, client: ClientId, frame: Frame) -> bool {
        let shared = self.inner.shared.lock().await;

        if !shared.clients.contains(&client) {
            debug!(client = %client, "Dropping frame from unregistered client");
            MuxMetrics::incr(&self.inner.metrics.frames_dropped);
            return false;
        }

        let Some(live) = &shared.live else {
            debug!(client = %client, "Dropping frame, upstream not live");
            MuxMetrics::incr(&self.inner.metrics.frames_dropped);
            return false;
        };

        if live.sender.send(frame).is_err() {
            debug!(client = %client, "Dropping frame, upstream writer gone");
            MuxMetrics::incr(&self.inner.metrics.frames_dropped);
            return false;
        }

        MuxMetrics::incr(&self.inner.metrics.frames_to_upstream);
        true
    }

    /// Remove a client from the active set (its close handler).
    pub async fn remove_client(&self, client: ClientId) -> bool {
        let mut shared = self.inner.shared.lock().await;
        let removed = shared.clients.remove(&client);
        if removed {
            MuxMetrics::incr(&self.inner.metrics.clients_removed);
            debug!(client = %client, clients = shared.clients.len(), "Client removed");
        }
        removed
    }

    /// Deliver `frame` to every client registered right now.
    pub async fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let shared = self.inner.shared.lock().await;
        self.deliver(&shared, &frame)
    }

    /// Declare the current session dead: close every client with the
    /// upstream-lost notice and empty the set. Returns how many clients were
    /// closed.
    pub async fn teardown_on_upstream_loss(&self) -> usize {
        self.teardown(None, CloseNotice::upstream_lost()).await
    }

    /// Tear the whole instance down. Clients get the shutdown notice and
    /// every later connect request fails with [`MuxError::ShuttingDown`].
    pub async fn shutdown(&self) -> usize {
        let mut shared = self.inner.shared.lock().await;
        info!("Shutting down multiplexer");
        // Cancelled under the lock so session tasks find their generation stale
        self.inner.shutdown.cancel();
        self.close_session(&mut shared, CloseNotice::shutting_down())
    }

    /// Connect, or join the session that is already live.
    ///
    /// The attempt runs on its own task: a caller that gives up midway must
    /// not leave the state stuck in `Connecting`.
    async fn connect(&self) -> Result<u64, MuxError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MuxError::ShuttingDown);
        }

        let this = self.clone();
        match tokio::spawn(async move { this.connect_attempt().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!("Upstream connect task did not finish: {}", e);
                Err(MuxError::UpstreamUnavailable)
            }
        }
    }

    async fn connect_attempt(&self) -> Result<u64, MuxError> {
        let _attempt = self.inner.connect_lock.lock().await;
        {
            let mut shared = self.inner.shared.lock().await;
            if let Some(generation) = shared.live_generation() {
                return Ok(generation);
            }
            if self.inner.shutdown.is_cancelled() {
                return Err(MuxError::ShuttingDown);
            }
            shared.state = SessionState::Connecting;
        }

        let result = tokio::select! {
            _ = self.inner.shutdown.cancelled() => Err(MuxError::ShuttingDown),
            result = upstream::open(&self.inner.config) => result,
        };

        let mut shared = self.inner.shared.lock().await;
        let stream = match result {
            Ok(_) | Err(MuxError::ShuttingDown) if self.inner.shutdown.is_cancelled() => {
                shared.state = SessionState::Disconnected;
                debug!("Upstream connect abandoned for shutdown");
                return Err(MuxError::ShuttingDown);
            }
            Ok(stream) => stream,
            Err(e) => {
                shared.state = SessionState::Disconnected;
                MuxMetrics::incr(&self.inner.metrics.upstream_connect_failures);
                warn!("Upstream connect failed: {}", e);
                return Err(e);
            }
        };

        shared.last_generation += 1;
        let generation = shared.last_generation;
        let cancel = self.inner.shutdown.child_token();
        let (sender, outgoing) = mpsc::unbounded_channel();

        let (sink, source) = stream.split();
        tokio::spawn(write_upstream(sink, outgoing, cancel.clone(), generation));
        tokio::spawn(self.clone().read_upstream(source, generation, cancel.clone()));

        shared.live = Some(LiveSession {
            generation,
            sender,
            cancel,
        });
        shared.state = SessionState::Live;
        MuxMetrics::incr(&self.inner.metrics.upstream_connects);
        info!(generation, "Upstream session live");

        Ok(generation)
    }

    async fn read_upstream(
        self,
        mut source: SplitStream<UpstreamStream>,
        generation: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = source.next() => message,
            };

            match message {
                Some(Ok(Message::Close(frame))) => {
                    info!(generation, ?frame, "Upstream closed the session");
                    break;
                }
                Some(Ok(message)) => {
                    if let Some(frame) = Frame::from_message(message) {
                        self.relay_upstream_frame(generation, frame).await;
                    }
                }
                Some(Err(e)) => {
                    warn!(generation, "Upstream transport error: {}", e);
                    break;
                }
                None => {
                    info!(generation, "Upstream stream ended");
                    break;
                }
            }
        }

        cancel.cancel();
        let notice = if self.inner.shutdown.is_cancelled() {
            CloseNotice::shutting_down()
        } else {
            CloseNotice::upstream_lost()
        };
        self.teardown(Some(generation), notice).await;
    }

    async fn relay_upstream_frame(&self, generation: u64, frame: Frame) {
        let shared = self.inner.shared.lock().await;
        if shared.live_generation() != Some(generation) {
            debug!(generation, "Discarding frame from stale upstream session");
            return;
        }
        self.deliver(&shared, &frame);
    }

    fn deliver(&self, shared: &Shared, frame: &Frame) -> BroadcastReport {
        let report = shared.clients.broadcast(frame);
        MuxMetrics::add(&self.inner.metrics.frames_to_clients, report.delivered);
        if report.failed > 0 {
            MuxMetrics::add(&self.inner.metrics.client_send_failures, report.failed);
            warn!(
                "Broadcast reached {} clients, {} were closing",
                report.delivered, report.failed
            );
        }
        report
    }

    /// Close all clients and drop the live session.
    ///
    /// With `Some(generation)` this only acts if that generation is still the
    /// live one, so a late event from a dead session cannot hurt its successor.
    async fn teardown(&self, generation: Option<u64>, notice: CloseNotice) -> usize {
        let mut shared = self.inner.shared.lock().await;

        if let Some(generation) = generation
            && shared.live_generation() != Some(generation)
        {
            debug!(generation, "Upstream session already torn down");
            return 0;
        }

        self.close_session(&mut shared, notice)
    }

    fn close_session(&self, shared: &mut Shared, notice: CloseNotice) -> usize {
        if let Some(live) = shared.live.take() {
            live.cancel.cancel();
            shared.state = SessionState::Disconnected;
            if notice.code == UPSTREAM_LOST_CODE {
                MuxMetrics::incr(&self.inner.metrics.upstream_losses);
            }
            info!(generation = live.generation, "Upstream session down");
        }

        let closed = shared.clients.close_all(&notice);
        MuxMetrics::add(&self.inner.metrics.clients_removed, closed);
        if closed > 0 {
            info!(
                "Closed {} clients with code {} ({})",
                closed, notice.code, notice.reason
            );
        }
        closed
    }
}

async fn write_upstream(
    mut sink: SplitSink<UpstreamStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outgoing.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        if let Err(e) = sink.send(Message::from(frame)).await {
            warn!(generation, "Failed to write to upstream: {}", e);
            cancel.cancel();
            return;
        }
    }

    // Best effort; the remote may already be gone
    if let Err(e) = sink.close().await {
        debug!(generation, "Upstream close: {}", e);
    }
}
