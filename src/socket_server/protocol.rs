//! Socket server control messages
//!
//! Notifications travel as [`StreamingMessage`](crate::streaming::StreamingMessage)
//! frames. The messages here are the control channel around them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::streaming::{ClientPreferences, ClientType, ConnectionInfo, PreferencesUpdate};

/// Client-to-server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Merge a partial preferences update
    UpdatePreferences { preferences: PreferencesUpdate },
    /// Ask for the service's connection summary
    GetConnectionInfo,
    /// Ping to check connection
    Ping,
}

/// Server-to-client message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration finished
    Connected {
        client_id: String,
        client_type: ClientType,
        preferences: ClientPreferences,
        resumed: bool,
        missed_events: usize,
    },
    /// Preferences after an update was merged
    PreferencesUpdated { preferences: ClientPreferences },
    ConnectionInfo(Box<ConnectionInfo>),
    /// Pong response
    Pong,
    /// Error response
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Parse one text frame from a client.
///
/// Besides tagged messages, a bare preferences object is accepted and
/// treated as `update_preferences`.
pub fn parse_client_message(text: &str) -> Result<ClientMessage> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("message_type").is_some() {
        return serde_json::from_value(value).map_err(|e| StreamError::InvalidMessage {
            message: e.to_string(),
        });
    }

    let update: PreferencesUpdate =
        serde_json::from_value(value).map_err(|e| StreamError::InvalidMessage {
            message: e.to_string(),
        })?;
    if update.is_empty() {
        return Err(StreamError::InvalidMessage {
            message: "expected a message_type or preference fields".to_string(),
        });
    }
    Ok(ClientMessage::UpdatePreferences { preferences: update })
}
