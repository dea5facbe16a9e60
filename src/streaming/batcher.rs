//! Per-client temporal and size-based event aggregation
//!
//! Each client with batching enabled has a pending list and at most one
//! outstanding timer. A batch leaves the batcher exactly once, through
//! whichever trigger fires first:
//!
//! - the size cap, which flushes inline from [`EventBatcher::add_event`]
//! - the timer, which sends a [`FlushDue`] notice to the dispatch loop; the
//!   loop then calls [`EventBatcher::take_due`]
//!
//! Every schedule and every flush bumps the client's generation, so a timer
//! that lost the race to the cap (or was aborted too late) finds a
//! generation mismatch and flushes nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::EventData;

use super::preferences::ClientPreferences;

/// Notice from a batch timer that a client's pending batch is due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushDue {
    pub client_id: String,
    pub generation: u64,
}

#[derive(Default)]
struct PendingBatch {
    events: Vec<Arc<EventData>>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl PendingBatch {
    fn take(&mut self) -> Vec<Arc<EventData>> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        std::mem::take(&mut self.events)
    }
}

pub struct EventBatcher {
    max_batch_size: usize,
    pending: Mutex<HashMap<String, PendingBatch>>,
    flush_tx: mpsc::UnboundedSender<FlushDue>,
}

impl EventBatcher {
    pub fn new(max_batch_size: usize, flush_tx: mpsc::UnboundedSender<FlushDue>) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            pending: Mutex::new(HashMap::new()),
            flush_tx,
        }
    }

    /// Add an admitted event to a client's stream.
    ///
    /// Returns the events to deliver now, in order, or `None` when the event
    /// was buffered. With batching disabled the event passes straight
    /// through, preceded by anything still pending from before the client
    /// turned batching off.
    ///
    /// Must be called from within a Tokio runtime when batching is enabled.
    pub fn add_event(
        &self,
        client_id: &str,
        event: Arc<EventData>,
        prefs: &ClientPreferences,
    ) -> Option<Vec<Arc<EventData>>> {
        let mut pending = self.pending.lock();

        if !prefs.enable_batching {
            return match pending.get_mut(client_id) {
                Some(batch) if !batch.events.is_empty() => {
                    let mut events = batch.take();
                    events.push(event);
                    Some(events)
                }
                _ => Some(vec![event]),
            };
        }

        let batch = pending.entry(client_id.to_string()).or_default();
        batch.events.push(event);

        if batch.events.len() >= self.max_batch_size {
            tracing::debug!(client_id, "Batch cap reached, flushing");
            return Some(batch.take());
        }

        if batch.events.len() == 1 {
            batch.generation += 1;
            let interval = Duration::from_millis(prefs.batch_interval_ms);
            batch.timer = Some(self.schedule(client_id, batch.generation, interval));
        }

        None
    }

    fn schedule(&self, client_id: &str, generation: u64, interval: Duration) -> JoinHandle<()> {
        let notice = FlushDue {
            client_id: client_id.to_string(),
            generation,
        };
        let flush_tx = self.flush_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // The dispatch loop may already be gone during shutdown.
            let _ = flush_tx.send(notice);
        })
    }

    /// Take the batch a timer announced, if that timer is still current
    pub fn take_due(&self, due: &FlushDue) -> Option<Vec<Arc<EventData>>> {
        let mut pending = self.pending.lock();
        let batch = pending.get_mut(&due.client_id)?;
        if batch.generation != due.generation || batch.events.is_empty() {
            return None;
        }
        // Timer already fired; nothing to abort.
        batch.timer = None;
        Some(batch.take())
    }

    /// Cancel a client's timer and hand back whatever was still pending
    pub fn cancel_client(&self, client_id: &str) -> Vec<Arc<EventData>> {
        match self.pending.lock().remove(client_id) {
            Some(mut batch) => batch.take(),
            None => Vec::new(),
        }
    }

    pub fn pending_count(&self, client_id: &str) -> usize {
        self.pending
            .lock()
            .get(client_id)
            .map(|b| b.events.len())
            .unwrap_or(0)
    }

    /// Abort every outstanding timer; pending events stay buffered
    pub fn abort_timers(&self) {
        for batch in self.pending.lock().values_mut() {
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
        }
    }

    /// Re-arm a timer for every client that still has pending events.
    ///
    /// Used when the dispatch loop restarts after [`abort_timers`](Self::abort_timers).
    pub fn rearm(&self, interval_for: impl Fn(&str) -> Option<Duration>) {
        let mut pending = self.pending.lock();
        for (client_id, batch) in pending.iter_mut() {
            if batch.events.is_empty() || batch.timer.is_some() {
                continue;
            }
            let Some(interval) = interval_for(client_id) else {
                continue;
            };
            batch.generation += 1;
            batch.timer = Some(self.schedule(client_id, batch.generation, interval));
        }
    }
}
