//! Wire-format projections of events
//!
//! Two message shapes go out to clients, both JSON:
//!
//! ```json
//! {"message_type":"notification","event_type":"file_changed","priority":"medium",
//!  "channel":"file_system","timestamp":"...","data":{...},"sequence_number":7}
//!
//! {"message_type":"batch_notification","event_type":"file_changed","priority":"high",
//!  "channel":"all","timestamp":"...","data":{"events":[...],"batch_size":3},
//!  "batch_info":{"event_count":3,"compressed":false},"sequence_number":8}
//! ```
//!
//! Messages are built fresh for every delivery and never stored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::events::{EventData, EventPriority, EventType, NotificationChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notification,
    BatchNotification,
}

/// Batch bookkeeping carried by `batch_notification` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub event_count: usize,
    /// Client's compression preference; the frame kind tells whether this
    /// particular payload was compressed
    pub compressed: bool,
    /// Set when the batch replays events missed while disconnected
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

/// Body of a batch message
#[derive(Debug, Serialize)]
pub struct NotificationBatch<'a> {
    pub events: Vec<&'a EventData>,
    pub batch_size: usize,
}

/// One outbound message: a single event or a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingMessage {
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: EventType,
    pub priority: EventPriority,
    pub channel: NotificationChannel,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_info: Option<BatchInfo>,
    pub sequence_number: u64,
}

impl StreamingMessage {
    pub fn notification(event: &EventData, sequence_number: u64) -> Result<Self> {
        Ok(Self {
            message_type: MessageType::Notification,
            event_id: Some(event.event_id().to_string()),
            event_type: event.event_type(),
            priority: event.priority(),
            channel: event.channel(),
            timestamp: event.timestamp(),
            source: Some(event.source().to_string()),
            data: serde_json::to_value(event.data())?,
            metadata: event.metadata().clone(),
            batch_info: None,
            sequence_number,
        })
    }

    /// Batch message for two or more events.
    ///
    /// Takes the first event's type, the highest priority in the batch and
    /// the flush time as timestamp.
    pub fn batch(
        events: &[Arc<EventData>],
        sequence_number: u64,
        compressed: bool,
        replayed: bool,
    ) -> Result<Self> {
        let event_type = events
            .first()
            .map(|e| e.event_type())
            .unwrap_or(EventType::SystemStatus);
        let priority = events
            .iter()
            .map(|e| e.priority())
            .max()
            .unwrap_or(EventPriority::Debug);
        let body = NotificationBatch {
            events: events.iter().map(|e| e.as_ref()).collect(),
            batch_size: events.len(),
        };

        Ok(Self {
            message_type: MessageType::BatchNotification,
            event_id: None,
            event_type,
            priority,
            channel: NotificationChannel::All,
            timestamp: Utc::now(),
            source: None,
            data: serde_json::to_value(&body)?,
            metadata: Map::new(),
            batch_info: Some(BatchInfo {
                event_count: events.len(),
                compressed,
                replayed,
            }),
            sequence_number,
        })
    }

    /// Single notification for one live event, batch message otherwise.
    ///
    /// Replays always use the batch shape so `batch_info.replayed` is present.
    pub fn for_flush(
        events: &[Arc<EventData>],
        sequence_number: u64,
        compressed: bool,
        replayed: bool,
    ) -> Result<Self> {
        match events {
            [single] if !replayed => Self::notification(single, sequence_number),
            _ => Self::batch(events, sequence_number, compressed, replayed),
        }
    }

    /// Sent as a `batch_notification`, whatever the event count
    pub fn is_batch(&self) -> bool {
        self.message_type == MessageType::BatchNotification
    }
}

/// A frame handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Raw JSON
    Text(String),
    /// Gzip-compressed JSON
    Binary(Vec<u8>),
}

impl OutboundFrame {
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}
