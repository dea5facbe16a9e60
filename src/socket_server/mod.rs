//! Stream Socket Server
//!
//! WebSocket front end for the streaming service: one daemon, many clients,
//! each with its own delivery preferences.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     STREAM SOCKET SERVER (stream-daemon)                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  TcpListener ──► ConnectionManager::handle_connection (task per socket) │
//! │                    - handshake: client_id, user agent                   │
//! │                    - register with EventStreamingService                │
//! │                    - pump: ChannelTransport frames ──► WebSocket        │
//! │                            control messages ◄── WebSocket              │
//! │                                                                         │
//! │  EventStreamingService (Arc, shared)                                    │
//! │    - registry, dispatch loop, grace sessions                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket. Notifications are text frames, or
//! binary frames holding gzip-compressed JSON.
//!
//! ```json
//! // Client -> Server
//! {"message_type": "update_preferences", "preferences": {"min_priority": "high"}}
//! {"message_type": "get_connection_info"}
//! {"message_type": "ping"}
//!
//! // Server -> Client
//! {"message_type": "connected", "client_id": "...", "client_type": "web", ...}
//! {"message_type": "notification", "event_type": "file_changed", "sequence_number": 1, ...}
//! {"message_type": "batch_notification", "batch_info": {"event_count": 3, ...}, ...}
//! {"message_type": "pong"}
//! ```

pub mod connection;
pub mod protocol;

pub use connection::{ConnectionManager, HandshakeInfo, CLIENT_ID_HEADER};
pub use protocol::{parse_client_message, ClientMessage, ServerMessage};
