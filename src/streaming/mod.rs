//! Event streaming engine
//!
//! Fans events from in-process producers out to connected clients, each with
//! its own delivery policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      EventStreamingService                          │
//! │                                                                     │
//! │  emit_event ──► mpsc (unbounded) ──► dispatch loop (single task)    │
//! │                                          │                          │
//! │            ┌─────────────────────────────┼──────────────────┐       │
//! │            ▼                             ▼                  ▼       │
//! │     ┌─────────────┐              ┌─────────────┐   ┌──────────────┐ │
//! │     │ EventFilter │──► admitted ─►│EventBatcher │──►│ Compression  │ │
//! │     └─────────────┘              └─────────────┘   └──────┬───────┘ │
//! │            │ client in GRACE            ▲ timers          │         │
//! │            ▼                            │                 ▼         │
//! │   ┌─────────────────────┐        FlushDue         Transport::send   │
//! │   │ ReconnectionTracker │ ◄──── failed / pending flushes            │
//! │   └─────────────────────┘                                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `preferences` - client classes, delivery preferences, custom filters
//! - `filter` - admission checks and per-client rate limiting
//! - `batcher` - per-client time/size batching
//! - `compression` - gzip with size and ratio gates
//! - `message` - wire-format messages
//! - `state` - per-client connection state
//! - `reconnect` - grace sessions and missed-event buffers
//! - `stats` - process-wide counters
//! - `service` - the orchestrator

pub mod batcher;
pub mod compression;
pub mod filter;
pub mod message;
pub mod preferences;
pub mod reconnect;
pub mod service;
pub mod state;
pub mod stats;

pub use batcher::{EventBatcher, FlushDue};
pub use compression::{decompress, CompressedPayload, CompressionManager, CompressionStats};
pub use filter::{EventFilter, FilterDecision};
pub use message::{BatchInfo, MessageType, NotificationBatch, OutboundFrame, StreamingMessage};
pub use preferences::{ClientPreferences, ClientType, CustomFilter, CustomFilters, PreferencesUpdate};
pub use reconnect::{GraceSummary, ReconnectionTracker, ResumedSession, SessionPhase};
pub use service::{
    ChannelTransport, ConnectionInfo, Delivery, EventStreamingService, Registration, Transport,
};
pub use state::{ClientDetails, ConnectionState};
pub use stats::{EventStats, StatsSnapshot};
