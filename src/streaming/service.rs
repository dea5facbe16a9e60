//! Event streaming orchestrator
//!
//! Owns the ingestion queue, the single dispatch task, the client registry
//! and the transport handles. Everything a delivery touches is reached
//! through one `Arc<ServiceInner>`; no global state.
//!
//! # Locking Order
//!
//! 1. `ServiceInner::registry`
//! 2. `EventBatcher` / `ReconnectionTracker` / `EventFilter` internals
//! 3. `ServiceInner::stats`
//!
//! No lock is held across an `.await`. Transport sends are synchronous
//! hand-offs, so a whole fan-out of one event runs under the registry lock
//! and a concurrent register/unregister never sees it half done.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::StreamingConfig;
use crate::error::{Result, StreamError};
use crate::events::EventData;

use super::batcher::{EventBatcher, FlushDue};
use super::compression::CompressionManager;
use super::filter::{EventFilter, FilterDecision};
use super::message::{OutboundFrame, StreamingMessage};
use super::preferences::{ClientPreferences, ClientType, PreferencesUpdate};
use super::reconnect::{GraceSummary, ReconnectionTracker, SessionPhase};
use super::state::{ClientDetails, ConnectionState};
use super::stats::{EventStats, StatsSnapshot};

// ============================================================================
// Transport contract
// ============================================================================

/// Outbound half of a client connection.
///
/// `send` must not block: implementations hand the frame to whatever owns
/// the socket. An error means the client is gone.
pub trait Transport: Send + Sync {
    fn send(&self, frame: OutboundFrame) -> Result<()>;

    /// Hand over a frame together with the events it encodes.
    ///
    /// Transports that queue frames keep the events, so whoever drains the
    /// queue can return unwritten ones through
    /// [`EventStreamingService::release_connection`].
    fn send_delivery(&self, delivery: Delivery) -> Result<()> {
        self.send(delivery.frame)
    }
}

/// A frame queued for a socket writer, with the events inside it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub frame: OutboundFrame,
    pub events: Vec<Arc<EventData>>,
}

/// Transport backed by a channel drained by the socket's writer task
pub struct ChannelTransport {
    client_id: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    pub fn new(client_id: impl Into<String>, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            client_id: client_id.into(),
            tx,
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.send_delivery(Delivery {
            frame,
            events: Vec::new(),
        })
    }

    fn send_delivery(&self, delivery: Delivery) -> Result<()> {
        self.tx.send(delivery).map_err(|_| StreamError::TransportClosed {
            client_id: self.client_id.clone(),
        })
    }
}

// ============================================================================
// Public results
// ============================================================================

/// What `register_client` did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub client_id: String,
    pub preferences: ClientPreferences,
    /// A GRACE session was picked up again
    pub resumed: bool,
    /// Missed events handed to the transport during resume
    pub replayed: usize,
    /// Identifies this particular transport for [`EventStreamingService::release_connection`]
    #[serde(skip)]
    pub connection_token: u64,
}

/// Snapshot returned by `get_connection_info`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub total_connections: usize,
    pub connected_clients: Vec<String>,
    pub client_details: BTreeMap<String, ClientDetails>,
    pub streaming_stats: StatsSnapshot,
    pub clients_in_grace: Vec<GraceSummary>,
}

#[derive(Debug, Clone, Copy)]
enum DisconnectReason {
    Unregistered,
    TransportError,
}

// ============================================================================
// Inner state
// ============================================================================

#[derive(Default)]
struct Registry {
    connections: HashMap<String, ConnectionState>,
    transports: HashMap<String, Arc<dyn Transport>>,
    tokens: HashMap<String, u64>,
}

struct ServiceInner {
    config: StreamingConfig,
    registry: Mutex<Registry>,
    filter: EventFilter,
    batcher: EventBatcher,
    compression: CompressionManager,
    reconnection: ReconnectionTracker,
    stats: Mutex<EventStats>,
    event_tx: mpsc::UnboundedSender<Arc<EventData>>,
    next_token: AtomicU64,
}

struct Receivers {
    events: mpsc::UnboundedReceiver<Arc<EventData>>,
    flushes: mpsc::UnboundedReceiver<FlushDue>,
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    dispatch: JoinHandle<Receivers>,
    purge: JoinHandle<()>,
}

// ============================================================================
// Service
// ============================================================================

/// Fan-out engine: producers call [`emit_event`](Self::emit_event), the
/// dispatch task delivers to every registered client.
///
/// Construct one per process and share it behind an `Arc`.
pub struct EventStreamingService {
    inner: Arc<ServiceInner>,
    receivers: Mutex<Option<Receivers>>,
    running: Mutex<Option<RunningLoop>>,
}

impl EventStreamingService {
    pub fn new(config: StreamingConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();

        let inner = ServiceInner {
            filter: EventFilter::new(config.rate_limit.window()),
            batcher: EventBatcher::new(config.batching.max_batch_size, flush_tx),
            compression: CompressionManager::new(&config.compression),
            reconnection: ReconnectionTracker::new(&config.reconnection),
            registry: Mutex::new(Registry::default()),
            stats: Mutex::new(EventStats::default()),
            event_tx,
            next_token: AtomicU64::new(1),
            config,
        };

        Self {
            inner: Arc::new(inner),
            receivers: Mutex::new(Some(Receivers {
                events: event_rx,
                flushes: flush_rx,
            })),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the dispatch task and the grace-session sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(StreamError::AlreadyRunning);
        }
        let receivers = self
            .receivers
            .lock()
            .take()
            .ok_or(StreamError::AlreadyRunning)?;

        self.inner.rearm_batch_timers();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&self.inner),
            receivers,
            shutdown_rx,
        ));
        let purge = tokio::spawn(purge_loop(
            Arc::clone(&self.inner),
            self.inner.config.reconnection.purge_interval(),
        ));

        *running = Some(RunningLoop {
            shutdown: shutdown_tx,
            dispatch,
            purge,
        });
        tracing::info!("Event streaming service started");
        Ok(())
    }

    /// Stop the dispatch task and wait for it to finish.
    ///
    /// Queued events stay queued and are delivered after the next `start`.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().take() else {
            return Err(StreamError::NotRunning);
        };

        running.purge.abort();
        let _ = running.shutdown.send(());
        match running.dispatch.await {
            Ok(receivers) => {
                *self.receivers.lock() = Some(receivers);
            }
            Err(e) => {
                tracing::error!("Dispatch task ended abnormally: {}", e);
            }
        }
        self.inner.batcher.abort_timers();
        tracing::info!("Event streaming service stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    // ------------------------------------------------------------------
    // Producer contract
    // ------------------------------------------------------------------

    /// Enqueue an event for fan-out. Never blocks.
    ///
    /// Statistics count the event here, at acceptance time.
    pub fn emit_event(&self, event: EventData) {
        let event = Arc::new(event);
        self.inner.stats.lock().record_accepted(&event);
        tracing::trace!(
            event_id = event.event_id(),
            event_type = %event.event_type(),
            "Event accepted"
        );
        if self.inner.event_tx.send(event).is_err() {
            tracing::warn!("Ingestion queue closed, event discarded");
        }
    }

    // ------------------------------------------------------------------
    // Client registry
    // ------------------------------------------------------------------

    /// Register (or re-register) a client's transport.
    ///
    /// - Already registered: the transport is swapped, preferences are
    ///   merged if given, numbering continues.
    /// - In GRACE: the session resumes with its sequence number and
    ///   preferences, and missed events are sent before anything new.
    /// - Otherwise: a fresh session with the client type's default
    ///   preferences, overlaid with `preferences` if given.
    pub fn register_client(
        &self,
        client_id: &str,
        client_type: ClientType,
        transport: Arc<dyn Transport>,
        preferences: Option<PreferencesUpdate>,
    ) -> Registration {
        self.inner
            .register_client(client_id, client_type, transport, preferences)
    }

    /// Remove a client's transport and move its session into GRACE.
    ///
    /// Returns false if the client was not registered.
    pub fn unregister_client(&self, client_id: &str) -> bool {
        let mut registry = self.inner.registry.lock();
        self.inner.disconnect_locked(
            &mut registry,
            client_id,
            Vec::new(),
            DisconnectReason::Unregistered,
        )
    }

    /// Unregister only if `connection_token` still owns the client id.
    ///
    /// A socket that was superseded by a newer connection for the same id
    /// must not tear the newer one down when it closes.
    ///
    /// `unwritten` holds events the transport accepted but never put on the
    /// wire, oldest first. They are not lost:
    /// - token still current: they lead the new GRACE buffer
    /// - client already in GRACE (a later send failed): they go in front of
    ///   what was recorded since
    /// - superseded by a newer socket: they are replayed on it
    pub fn release_connection(
        &self,
        client_id: &str,
        connection_token: u64,
        unwritten: Vec<Arc<EventData>>,
    ) -> bool {
        self.inner
            .release_connection(client_id, connection_token, unwritten)
    }

    /// Merge a partial update into a registered client's preferences.
    ///
    /// Takes effect for the next event the dispatch loop handles.
    pub fn update_preferences(
        &self,
        client_id: &str,
        update: &PreferencesUpdate,
    ) -> Option<ClientPreferences> {
        let mut registry = self.inner.registry.lock();
        let state = registry.connections.get_mut(client_id)?;
        state.preferences = update.apply_to(&state.preferences);
        state.touch();
        tracing::debug!(client_id, "Preferences updated");
        Some(state.preferences.clone())
    }

    /// Note activity from a client (any inbound message)
    pub fn touch(&self, client_id: &str) {
        if let Some(state) = self.inner.registry.lock().connections.get_mut(client_id) {
            state.touch();
        }
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.inner.registry.lock().connections.contains_key(client_id)
    }

    pub fn preferences(&self, client_id: &str) -> Option<ClientPreferences> {
        self.inner
            .registry
            .lock()
            .connections
            .get(client_id)
            .map(|s| s.preferences.clone())
    }

    pub fn session_phase(&self, client_id: &str) -> SessionPhase {
        self.inner.reconnection.session_phase(client_id)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_connection_info(&self) -> ConnectionInfo {
        let registry = self.inner.registry.lock();
        let mut connected_clients: Vec<String> = registry.connections.keys().cloned().collect();
        connected_clients.sort();
        let client_details = registry
            .connections
            .iter()
            .map(|(id, state)| (id.clone(), state.details()))
            .collect();
        let total_connections = registry.connections.len();
        drop(registry);

        ConnectionInfo {
            total_connections,
            connected_clients,
            client_details,
            streaming_stats: self.stats(),
            clients_in_grace: self.inner.reconnection.clients_in_grace(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner
            .stats
            .lock()
            .snapshot(self.inner.compression.stats())
    }

    /// Admin action: zero all counters
    pub fn reset_stats(&self) {
        self.inner.stats.lock().reset();
        self.inner.compression.reset_stats();
        tracing::info!("Streaming statistics reset");
    }

    pub fn pending_batch_len(&self, client_id: &str) -> usize {
        self.inner.batcher.pending_count(client_id)
    }
}

// ============================================================================
// Background tasks
// ============================================================================

async fn dispatch_loop(
    inner: Arc<ServiceInner>,
    mut receivers: Receivers,
    mut shutdown: oneshot::Receiver<()>,
) -> Receivers {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            Some(due) = receivers.flushes.recv() => inner.flush_due(due),

            Some(event) = receivers.events.recv() => inner.dispatch(event),

            else => break,
        }
    }
    receivers
}

async fn purge_loop(inner: Arc<ServiceInner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.purge_expired();
    }
}

// ============================================================================
// Delivery
// ============================================================================

impl ServiceInner {
    fn register_client(
        &self,
        client_id: &str,
        client_type: ClientType,
        transport: Arc<dyn Transport>,
        preferences: Option<PreferencesUpdate>,
    ) -> Registration {
        let connection_token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.lock();
        registry
            .tokens
            .insert(client_id.to_string(), connection_token);

        if let Some(state) = registry.connections.get_mut(client_id) {
            if let Some(update) = &preferences {
                state.preferences = update.apply_to(&state.preferences);
            }
            state.touch();
            let preferences = state.preferences.clone();
            registry.transports.insert(client_id.to_string(), transport);
            tracing::info!(client_id, "Client re-registered, transport replaced");
            return Registration {
                client_id: client_id.to_string(),
                preferences,
                resumed: false,
                replayed: 0,
                connection_token,
            };
        }

        let (state, missed) = match self.reconnection.resume(client_id) {
            Some(session) => {
                let mut state = session.state;
                if let Some(update) = &preferences {
                    state.preferences = update.apply_to(&state.preferences);
                }
                state.active = true;
                state.touch();
                (state, Some(session.missed))
            }
            None => {
                let defaults = client_type.default_preferences(client_id);
                let prefs = match &preferences {
                    Some(update) => update.apply_to(&defaults),
                    None => defaults,
                };
                self.reconnection.register_client_session(client_id);
                (
                    ConnectionState::new(client_id.to_string(), client_type, prefs),
                    None,
                )
            }
        };

        let resumed = missed.is_some();
        let preferences = state.preferences.clone();
        registry.connections.insert(client_id.to_string(), state);
        registry.transports.insert(client_id.to_string(), transport);
        self.stats.lock().connected_clients = registry.connections.len();
        tracing::info!(
            client_id,
            client_type = %client_type,
            resumed,
            "Client registered"
        );

        let replayed = match missed {
            Some(missed) if !missed.is_empty() => self.replay_locked(&mut registry, client_id, missed),
            _ => 0,
        };

        Registration {
            client_id: client_id.to_string(),
            preferences,
            resumed,
            replayed,
            connection_token,
        }
    }

    fn release_connection(
        &self,
        client_id: &str,
        connection_token: u64,
        unwritten: Vec<Arc<EventData>>,
    ) -> bool {
        let mut registry = self.registry.lock();
        match registry.tokens.get(client_id).copied() {
            Some(token) if token == connection_token => self.disconnect_locked(
                &mut registry,
                client_id,
                unwritten,
                DisconnectReason::Unregistered,
            ),
            Some(_) => {
                if !unwritten.is_empty() {
                    self.replay_locked(&mut registry, client_id, unwritten);
                }
                false
            }
            None => {
                let restored = self.reconnection.restore_missed(client_id, unwritten);
                if restored > 0 {
                    self.stats.lock().missed_events_recorded += restored as u64;
                    tracing::debug!(client_id, restored, "Unwritten frames returned to grace buffer");
                }
                false
            }
        }
    }

    /// Send missed events in emission order, in chunks of the batch cap.
    ///
    /// If a chunk fails, it and everything after it go back to GRACE.
    fn replay_locked(
        &self,
        registry: &mut Registry,
        client_id: &str,
        missed: Vec<Arc<EventData>>,
    ) -> usize {
        let chunk_size = self.config.batching.max_batch_size.max(1);
        let mut replayed = 0;
        let mut remaining = missed.as_slice();

        while !remaining.is_empty() {
            let take = chunk_size.min(remaining.len());
            let (chunk, rest) = remaining.split_at(take);
            if let Err(e) = self.deliver_to(registry, client_id, chunk, true) {
                tracing::warn!(client_id, "Replay failed: {}", e);
                self.disconnect_locked(
                    registry,
                    client_id,
                    remaining.to_vec(),
                    DisconnectReason::TransportError,
                );
                break;
            }
            replayed += take;
            remaining = rest;
        }

        if replayed > 0 {
            self.stats.lock().missed_events_replayed += replayed as u64;
            tracing::info!(client_id, replayed, "Replayed missed events");
        }
        replayed
    }

    /// Fan one event out to every registered client
    fn dispatch(&self, event: Arc<EventData>) {
        let mut registry = self.registry.lock();

        let recorded = self.reconnection.track_missed_event(&event, &self.filter);

        let mut rate_limited = 0u64;
        let mut ready: Vec<(String, Vec<Arc<EventData>>)> = Vec::new();
        for (client_id, state) in registry.connections.iter() {
            match self.filter.evaluate(&event, &state.preferences) {
                FilterDecision::Admit => {}
                FilterDecision::RateLimited => {
                    rate_limited += 1;
                    tracing::debug!(client_id = %client_id, "Rate limit hit, event dropped");
                    continue;
                }
                decision => {
                    tracing::trace!(client_id = %client_id, ?decision, "Event filtered");
                    continue;
                }
            }
            if let Some(events) =
                self.batcher
                    .add_event(client_id, Arc::clone(&event), &state.preferences)
            {
                ready.push((client_id.clone(), events));
            }
        }

        if recorded > 0 || rate_limited > 0 {
            let mut stats = self.stats.lock();
            stats.missed_events_recorded += recorded as u64;
            stats.rate_limited += rate_limited;
        }

        for (client_id, events) in ready {
            self.flush_locked(&mut registry, &client_id, events);
        }
    }

    /// A batch timer fired
    fn flush_due(&self, due: FlushDue) {
        let mut registry = self.registry.lock();
        let Some(events) = self.batcher.take_due(&due) else {
            return;
        };
        if registry.connections.contains_key(&due.client_id) {
            self.flush_locked(&mut registry, &due.client_id, events);
        } else {
            let n = self
                .reconnection
                .track_missed_events_for_client(&due.client_id, events);
            self.stats.lock().missed_events_recorded += n as u64;
        }
    }

    fn flush_locked(&self, registry: &mut Registry, client_id: &str, events: Vec<Arc<EventData>>) {
        if let Err(e) = self.deliver_to(registry, client_id, &events, false) {
            tracing::warn!(client_id, "Delivery failed, marking client inactive: {}", e);
            self.disconnect_locked(registry, client_id, events, DisconnectReason::TransportError);
        }
    }

    /// Build, encode and hand one flush to the client's transport.
    ///
    /// The sequence number only advances once the transport accepted the frame.
    fn deliver_to(
        &self,
        registry: &mut Registry,
        client_id: &str,
        events: &[Arc<EventData>],
        replayed: bool,
    ) -> Result<()> {
        let transport = registry
            .transports
            .get(client_id)
            .cloned()
            .ok_or_else(|| StreamError::TransportClosed {
                client_id: client_id.to_string(),
            })?;
        let state = registry
            .connections
            .get_mut(client_id)
            .ok_or_else(|| StreamError::TransportClosed {
                client_id: client_id.to_string(),
            })?;

        let sequence = state.sequence_number + 1;
        let compress = state.preferences.enable_compression;

        let outcome = StreamingMessage::for_flush(events, sequence, compress, replayed)
            .and_then(|message| Ok((message.is_batch(), serde_json::to_string(&message)?)))
            .and_then(|(batch, json)| {
                let frame = self.encode(json, compress);
                let compressed = frame.is_compressed();
                let delivery = Delivery {
                    frame,
                    events: events.to_vec(),
                };
                transport.send_delivery(delivery).map(|_| (batch, compressed))
            });

        match outcome {
            Ok((batch, compressed)) => {
                state.sequence_number = sequence;
                state.touch();
                self.stats.lock().record_sent(batch, compressed);
                Ok(())
            }
            Err(e) => {
                state.active = false;
                self.stats.lock().failed_deliveries += 1;
                Err(e)
            }
        }
    }

    fn encode(&self, json: String, compress: bool) -> OutboundFrame {
        if !compress {
            return OutboundFrame::Text(json);
        }
        match self.compression.compress(&json) {
            Ok(payload) if payload.compressed => OutboundFrame::Binary(payload.bytes),
            Ok(_) => OutboundFrame::Text(json),
            Err(e) => {
                tracing::warn!("Compression failed, sending raw: {}", e);
                OutboundFrame::Text(json)
            }
        }
    }

    /// Drop a client's transport and move it into GRACE.
    ///
    /// `undelivered` (a flush that failed) and anything still pending in
    /// the batcher become its first missed events, in that order.
    fn disconnect_locked(
        &self,
        registry: &mut Registry,
        client_id: &str,
        undelivered: Vec<Arc<EventData>>,
        reason: DisconnectReason,
    ) -> bool {
        registry.transports.remove(client_id);
        registry.tokens.remove(client_id);
        let Some(mut state) = registry.connections.remove(client_id) else {
            return false;
        };
        state.active = false;

        let mut missed = undelivered;
        missed.extend(self.batcher.cancel_client(client_id));

        self.reconnection.client_disconnected(state);
        let recorded = self
            .reconnection
            .track_missed_events_for_client(client_id, missed);

        let mut stats = self.stats.lock();
        stats.connected_clients = registry.connections.len();
        stats.missed_events_recorded += recorded as u64;
        drop(stats);

        tracing::info!(client_id, ?reason, carried_over = recorded, "Client unregistered");
        true
    }

    fn purge_expired(&self) {
        for client_id in self.reconnection.purge_expired() {
            self.filter.forget_client(&client_id);
        }
    }

    fn rearm_batch_timers(&self) {
        let intervals: HashMap<String, Duration> = self
            .registry
            .lock()
            .connections
            .iter()
            .filter(|(_, s)| s.preferences.enable_batching)
            .map(|(id, s)| {
                (
                    id.clone(),
                    Duration::from_millis(s.preferences.batch_interval_ms),
                )
            })
            .collect();
        self.batcher.rearm(|id| intervals.get(id).copied());
    }
}

impl Drop for EventStreamingService {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.purge.abort();
            running.dispatch.abort();
        }
    }
}
