//! Per-client connection bookkeeping

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::preferences::{ClientPreferences, ClientType};

/// Live state of one client session.
///
/// `sequence_number` starts at 0 and advances by one for every flush the
/// transport accepted, so the first message a client sees carries 1.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub client_id: String,
    pub client_type: ClientType,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub preferences: ClientPreferences,
    pub sequence_number: u64,
    /// Events recorded for this client while it was disconnected
    pub missed_events: u64,
    pub active: bool,
}

impl ConnectionState {
    pub fn new(client_id: String, client_type: ClientType, preferences: ClientPreferences) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            client_type,
            connected_at: now,
            last_seen: now,
            preferences,
            sequence_number: 0,
            missed_events: 0,
            active: true,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn details(&self) -> ClientDetails {
        ClientDetails {
            client_type: self.client_type,
            connected_at: self.connected_at,
            last_seen: self.last_seen,
            sequence_number: self.sequence_number,
            missed_events: self.missed_events,
            active: self.active,
            preferences: self.preferences.clone(),
        }
    }
}

/// Per-client metadata reported by introspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientDetails {
    pub client_type: ClientType,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sequence_number: u64,
    pub missed_events: u64,
    pub active: bool,
    pub preferences: ClientPreferences,
}
