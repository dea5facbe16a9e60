//! Per-client admission policy
//!
//! Checks run in a fixed order and stop at the first rejection:
//! channel, priority floor, rate limit, custom filters. The rate limiter
//! keeps a deque of admission instants per client (monotonic clock) and
//! drops, rather than queues, anything over the limit.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::EventData;

use super::preferences::ClientPreferences;

/// Outcome of evaluating one event against one client's preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Admit,
    ChannelDisabled,
    BelowMinPriority,
    RateLimited,
    CustomFilter,
}

impl FilterDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Admission predicate with per-client rate-limit windows
pub struct EventFilter {
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl EventFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn should_deliver(&self, event: &EventData, prefs: &ClientPreferences) -> bool {
        self.evaluate(event, prefs).is_admitted()
    }

    /// Evaluate and report which check rejected the event.
    ///
    /// An event that reaches the rate limiter takes a window slot even if a
    /// custom filter rejects it afterwards.
    pub fn evaluate(&self, event: &EventData, prefs: &ClientPreferences) -> FilterDecision {
        self.evaluate_at(event, prefs, Instant::now())
    }

    fn evaluate_at(
        &self,
        event: &EventData,
        prefs: &ClientPreferences,
        now: Instant,
    ) -> FilterDecision {
        if !prefs.accepts_channel(event.channel()) {
            return FilterDecision::ChannelDisabled;
        }

        if event.priority().rank() < prefs.min_priority.rank() {
            return FilterDecision::BelowMinPriority;
        }

        if !self.try_acquire(&prefs.client_id, prefs.max_events_per_second, now) {
            return FilterDecision::RateLimited;
        }

        if !prefs.custom_filters.admits(event) {
            return FilterDecision::CustomFilter;
        }

        FilterDecision::Admit
    }

    fn try_acquire(&self, client_id: &str, limit: u32, now: Instant) -> bool {
        if limit == 0 {
            return true;
        }
        let limit = limit as usize;

        let mut windows = self.windows.lock();
        let window = windows
            .entry(client_id.to_string())
            .or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= limit {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop the rate-limit window of a client that is gone for good
    pub fn forget_client(&self, client_id: &str) {
        self.windows.lock().remove(client_id);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}
