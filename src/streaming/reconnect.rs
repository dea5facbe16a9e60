//! Session retention and missed-event bookkeeping across disconnects
//!
//! ```text
//!  CONNECTED ──transport lost──► GRACE ──reconnect in window──► CONNECTED
//!                                  │
//!                                  └──window elapsed──► PURGED
//! ```
//!
//! While in GRACE a session collects the events its preferences admit, in
//! emission order, up to `max_missed_events` (oldest dropped first).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ReconnectionConfig;
use crate::events::EventData;

use super::filter::EventFilter;
use super::state::ConnectionState;

/// Where a client session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Connected,
    Grace,
    /// Never seen, or grace expired and the session was discarded
    Purged,
}

struct GraceSession {
    since: Instant,
    state: ConnectionState,
    missed: VecDeque<Arc<EventData>>,
    dropped: u64,
}

enum Session {
    Connected,
    Grace(GraceSession),
}

/// A session taken out of GRACE on reconnect
#[derive(Debug)]
pub struct ResumedSession {
    pub state: ConnectionState,
    /// Missed events in original emission order
    pub missed: Vec<Arc<EventData>>,
    /// Events evicted because the buffer was full
    pub dropped: u64,
}

/// Introspection row for a session in GRACE
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraceSummary {
    pub client_id: String,
    pub missed_events: usize,
    pub dropped_missed_events: u64,
    pub disconnected_for_ms: u64,
}

pub struct ReconnectionTracker {
    grace_period: Duration,
    max_missed: usize,
    sessions: Mutex<HashMap<String, Session>>,
}

impl ReconnectionTracker {
    pub fn new(config: &ReconnectionConfig) -> Self {
        Self::with_limits(config.grace_period(), config.max_missed_events)
    }

    pub fn with_limits(grace_period: Duration, max_missed: usize) -> Self {
        Self {
            grace_period,
            max_missed,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record a brand-new session as CONNECTED
    pub fn register_client_session(&self, client_id: &str) {
        self.sessions
            .lock()
            .insert(client_id.to_string(), Session::Connected);
    }

    /// Move a session into GRACE, keeping its state for a later resume
    pub fn client_disconnected(&self, mut state: ConnectionState) {
        state.active = false;
        let client_id = state.client_id.clone();
        tracing::info!(
            client_id = %client_id,
            grace_secs = self.grace_period.as_secs(),
            "Client disconnected, retaining session"
        );
        self.sessions.lock().insert(
            client_id,
            Session::Grace(GraceSession {
                since: Instant::now(),
                state,
                missed: VecDeque::new(),
                dropped: 0,
            }),
        );
    }

    /// Offer an event to every session in GRACE.
    ///
    /// Each session records it only if its own preferences admit it.
    /// Returns how many sessions recorded the event.
    pub fn track_missed_event(&self, event: &Arc<EventData>, filter: &EventFilter) -> usize {
        let mut sessions = self.sessions.lock();
        let mut recorded = 0;
        for session in sessions.values_mut() {
            let Session::Grace(grace) = session else {
                continue;
            };
            if grace.since.elapsed() > self.grace_period {
                continue;
            }
            if filter.should_deliver(event, &grace.state.preferences) {
                Self::push_missed(grace, Arc::clone(event), self.max_missed);
                recorded += 1;
            }
        }
        recorded
    }

    /// Record already-admitted events for one client in GRACE.
    ///
    /// Used for batches that were pending or failed to send when the client
    /// dropped. Returns how many were recorded (0 if the client is not in GRACE).
    pub fn track_missed_events_for_client(
        &self,
        client_id: &str,
        events: Vec<Arc<EventData>>,
    ) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.lock();
        let Some(Session::Grace(grace)) = sessions.get_mut(client_id) else {
            tracing::debug!(client_id, dropped = events.len(), "No grace session for undelivered events");
            return 0;
        };
        let count = events.len();
        for event in events {
            Self::push_missed(grace, event, self.max_missed);
        }
        count
    }

    /// Put events that were handed out but never written back at the front
    /// of a GRACE buffer, ahead of anything recorded since.
    ///
    /// The cap still holds, so the oldest are the first to go.
    pub fn restore_missed(&self, client_id: &str, events: Vec<Arc<EventData>>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut sessions = self.sessions.lock();
        let Some(Session::Grace(grace)) = sessions.get_mut(client_id) else {
            tracing::debug!(client_id, dropped = events.len(), "No grace session for unwritten events");
            return 0;
        };
        let count = events.len();
        for event in events.into_iter().rev() {
            grace.missed.push_front(event);
        }
        grace.state.missed_events += count as u64;
        while grace.missed.len() > self.max_missed {
            grace.missed.pop_front();
            grace.dropped += 1;
        }
        count
    }

    fn push_missed(grace: &mut GraceSession, event: Arc<EventData>, cap: usize) {
        if cap == 0 {
            grace.dropped += 1;
            return;
        }
        if grace.missed.len() >= cap {
            grace.missed.pop_front();
            grace.dropped += 1;
        }
        grace.missed.push_back(event);
        grace.state.missed_events += 1;
    }

    /// Take a session out of GRACE if it is still inside the window.
    ///
    /// An expired session is purged and `None` is returned, as for an
    /// unknown client.
    pub fn resume(&self, client_id: &str) -> Option<ResumedSession> {
        let mut sessions = self.sessions.lock();
        let within_window = match sessions.get(client_id) {
            Some(Session::Grace(grace)) => grace.since.elapsed() <= self.grace_period,
            _ => return None,
        };
        if !within_window {
            tracing::info!(client_id, "Grace period elapsed, starting fresh session");
            sessions.remove(client_id);
            return None;
        }

        let Some(Session::Grace(grace)) =
            sessions.insert(client_id.to_string(), Session::Connected)
        else {
            return None;
        };
        tracing::info!(
            client_id,
            missed = grace.missed.len(),
            dropped = grace.dropped,
            "Resuming session"
        );
        Some(ResumedSession {
            state: grace.state,
            missed: grace.missed.into_iter().collect(),
            dropped: grace.dropped,
        })
    }

    pub fn session_phase(&self, client_id: &str) -> SessionPhase {
        match self.sessions.lock().get(client_id) {
            Some(Session::Connected) => SessionPhase::Connected,
            Some(Session::Grace(grace)) if grace.since.elapsed() <= self.grace_period => {
                SessionPhase::Grace
            }
            _ => SessionPhase::Purged,
        }
    }

    /// Discard every GRACE session whose window has elapsed
    pub fn purge_expired(&self) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter_map(|(id, session)| match session {
                Session::Grace(grace) if grace.since.elapsed() > self.grace_period => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Purged expired client sessions");
        }
        expired
    }

    pub fn missed_count(&self, client_id: &str) -> usize {
        match self.sessions.lock().get(client_id) {
            Some(Session::Grace(grace)) => grace.missed.len(),
            _ => 0,
        }
    }

    pub fn clients_in_grace(&self) -> Vec<GraceSummary> {
        let sessions = self.sessions.lock();
        let mut rows: Vec<GraceSummary> = sessions
            .iter()
            .filter_map(|(id, session)| match session {
                Session::Grace(grace) if grace.since.elapsed() <= self.grace_period => {
                    Some(GraceSummary {
                        client_id: id.clone(),
                        missed_events: grace.missed.len(),
                        dropped_missed_events: grace.dropped,
                        disconnected_for_ms: grace.since.elapsed().as_millis() as u64,
                    })
                }
                _ => None,
            })
            .collect();
        rows.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        rows
    }
}
