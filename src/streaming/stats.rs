//! Process-wide streaming counters
//!
//! `total_events`, `by_type` and `by_priority` count events accepted by
//! `emit_event`, not events delivered. Counters live until the process exits
//! or an admin calls reset.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::{EventData, EventPriority, EventType};

use super::compression::CompressionStats;

#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub by_type: BTreeMap<EventType, u64>,
    pub by_priority: BTreeMap<EventPriority, u64>,
    pub failed_deliveries: u64,
    /// Gauge of clients with a live transport
    pub connected_clients: usize,
    pub messages_sent: u64,
    pub batches_sent: u64,
    pub compressed_messages: u64,
    pub rate_limited: u64,
    pub missed_events_recorded: u64,
    pub missed_events_replayed: u64,
}

impl EventStats {
    pub fn record_accepted(&mut self, event: &EventData) {
        self.total_events += 1;
        *self.by_type.entry(event.event_type()).or_insert(0) += 1;
        *self.by_priority.entry(event.priority()).or_insert(0) += 1;
    }

    pub fn record_sent(&mut self, batch: bool, compressed: bool) {
        self.messages_sent += 1;
        if batch {
            self.batches_sent += 1;
        }
        if compressed {
            self.compressed_messages += 1;
        }
    }

    /// Zero every counter; the connected-clients gauge reflects live state and is kept
    pub fn reset(&mut self) {
        let connected_clients = self.connected_clients;
        *self = Self {
            connected_clients,
            ..Self::default()
        };
    }

    pub fn snapshot(&self, compression: CompressionStats) -> StatsSnapshot {
        StatsSnapshot {
            total_events: self.total_events,
            by_type: self
                .by_type
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            by_priority: self
                .by_priority
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            failed_deliveries: self.failed_deliveries,
            connected_clients: self.connected_clients,
            messages_sent: self.messages_sent,
            batches_sent: self.batches_sent,
            compressed_messages: self.compressed_messages,
            bytes_saved_by_compression: compression.bytes_saved,
            rate_limited: self.rate_limited,
            missed_events_recorded: self.missed_events_recorded,
            missed_events_replayed: self.missed_events_replayed,
        }
    }
}

/// Serializable view of [`EventStats`] for introspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_events: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub failed_deliveries: u64,
    pub connected_clients: usize,
    pub messages_sent: u64,
    pub batches_sent: u64,
    pub compressed_messages: u64,
    pub bytes_saved_by_compression: u64,
    pub rate_limited: u64,
    pub missed_events_recorded: u64,
    pub missed_events_replayed: u64,
}
