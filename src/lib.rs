//! Stream-Engine: real-time event fan-out for connected clients
//!
//! Producers inside the process (file watchers, analyzers, agents) emit typed
//! events; the engine delivers each one to every connected client that wants
//! it, honouring per-client channel selection, priority floors, rate limits,
//! batching and compression. Clients that drop off keep their session for a
//! grace period and get what they missed on reconnect.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stream_engine::events::{EventData, FileChangeKind};
//! use stream_engine::streaming::{ChannelTransport, ClientType};
//! use stream_engine::{EventStreamingService, StreamingConfig};
//!
//! let service = Arc::new(EventStreamingService::new(StreamingConfig::default()));
//! service.start()?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! service.register_client("ios-1", ClientType::Ios, Arc::new(ChannelTransport::new("ios-1", tx)), None);
//!
//! service.emit_event(EventData::file_changed("src/lib.rs", FileChangeKind::Modified));
//! let frame = rx.recv().await;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod socket_server;
pub mod streaming;

// Re-export commonly used types
pub use config::StreamingConfig;
pub use error::{Result, StreamError};
pub use events::{AgentPhase, EventData, EventPayload, EventPriority, EventType, NotificationChannel};
pub use streaming::{
    ClientPreferences, ClientType, ConnectionInfo, Delivery, EventStreamingService,
    OutboundFrame, PreferencesUpdate, StreamingMessage, Transport,
};
