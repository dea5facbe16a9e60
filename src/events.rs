//! Event taxonomy for the streaming engine
//!
//! Producers (file watcher, analyzers, quality checks, agents) build an
//! [`EventData`] envelope and hand it to
//! [`EventStreamingService::emit_event`](crate::streaming::EventStreamingService::emit_event).
//! The envelope is immutable once built; the dispatch loop shares it between
//! clients behind an `Arc`.
//!
//! # Event Format
//!
//! ```json
//! {"event_id":"...","event_type":"file_changed","priority":"medium",
//!  "channel":"file_system","timestamp":"2024-01-15T10:30:00Z",
//!  "source":"watcher","data":{"kind":"file_change","file_path":"src/lib.rs",...},
//!  "metadata":{}}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StreamError};

// ============================================================================
// Discriminants
// ============================================================================

/// Kind of state change an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileChanged,
    FileCreated,
    FileDeleted,
    AnalysisStarted,
    AnalysisCompleted,
    AnalysisFailed,
    ViolationDetected,
    ViolationResolved,
    AgentStarted,
    AgentProgress,
    AgentCompleted,
    AgentError,
    SystemStatus,
    SystemError,
}

impl EventType {
    /// Wire name, e.g. `file_changed`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileChanged => "file_changed",
            Self::FileCreated => "file_created",
            Self::FileDeleted => "file_deleted",
            Self::AnalysisStarted => "analysis_started",
            Self::AnalysisCompleted => "analysis_completed",
            Self::AnalysisFailed => "analysis_failed",
            Self::ViolationDetected => "violation_detected",
            Self::ViolationResolved => "violation_resolved",
            Self::AgentStarted => "agent_started",
            Self::AgentProgress => "agent_progress",
            Self::AgentCompleted => "agent_completed",
            Self::AgentError => "agent_error",
            Self::SystemStatus => "system_status",
            Self::SystemError => "system_error",
        }
    }

    /// Channel an event of this type is published on
    pub fn channel(&self) -> NotificationChannel {
        match self {
            Self::FileChanged | Self::FileCreated | Self::FileDeleted => {
                NotificationChannel::FileSystem
            }
            Self::AnalysisStarted | Self::AnalysisCompleted | Self::AnalysisFailed => {
                NotificationChannel::Analysis
            }
            Self::ViolationDetected | Self::ViolationResolved => NotificationChannel::Violations,
            Self::AgentStarted | Self::AgentProgress | Self::AgentCompleted | Self::AgentError => {
                NotificationChannel::Agent
            }
            Self::SystemStatus | Self::SystemError => NotificationChannel::System,
        }
    }

    /// Priority used when the producer does not pick one
    pub fn default_priority(&self) -> EventPriority {
        match self {
            Self::AgentProgress | Self::AnalysisStarted => EventPriority::Low,
            Self::FileChanged
            | Self::FileCreated
            | Self::FileDeleted
            | Self::AnalysisCompleted
            | Self::ViolationResolved
            | Self::AgentStarted
            | Self::AgentCompleted
            | Self::SystemStatus => EventPriority::Medium,
            Self::AnalysisFailed | Self::ViolationDetected | Self::AgentError => {
                EventPriority::High
            }
            Self::SystemError => EventPriority::Critical,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency ordinal used as an admission floor.
///
/// Variants are declared in rank order so the derived `Ord` matches [`rank`](Self::rank).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Debug,
    Low,
    Medium,
    High,
    Critical,
}

impl EventPriority {
    pub const ALL: [EventPriority; 5] = [
        EventPriority::Debug,
        EventPriority::Low,
        EventPriority::Medium,
        EventPriority::High,
        EventPriority::Critical,
    ];

    pub fn rank(&self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical topic grouping of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    FileSystem,
    Analysis,
    Violations,
    Agent,
    System,
    /// Subscribes to every channel; batches are published on it too
    All,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileSystem => "file_system",
            Self::Analysis => "analysis",
            Self::Violations => "violations",
            Self::Agent => "agent",
            Self::System => "system",
            Self::All => "all",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// How a file changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// Lifecycle step reported by an agent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Started,
    Progress,
    Completed,
    Error,
}

impl AgentPhase {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Started => EventType::AgentStarted,
            Self::Progress => EventType::AgentProgress,
            Self::Completed => EventType::AgentCompleted,
            Self::Error => EventType::AgentError,
        }
    }
}

/// Variant-specific body of an event, selected by its `event_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    FileChange {
        file_path: String,
        change_type: FileChangeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines_added: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines_removed: Option<u32>,
    },
    Analysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        analysis_type: String,
        #[serde(default)]
        results: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence_score: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Violation {
        file_path: String,
        rule_id: String,
        severity: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence_score: Option<f64>,
    },
    Agent {
        agent_id: String,
        action: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence_score: Option<f64>,
    },
    System {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default)]
        details: Value,
    },
}

impl EventPayload {
    /// Whether this payload is the body an event of `event_type` carries
    pub fn fits(&self, event_type: EventType) -> bool {
        let channel = match self {
            Self::FileChange { .. } => NotificationChannel::FileSystem,
            Self::Analysis { .. } => NotificationChannel::Analysis,
            Self::Violation { .. } => NotificationChannel::Violations,
            Self::Agent { .. } => NotificationChannel::Agent,
            Self::System { .. } => NotificationChannel::System,
        };
        event_type.channel() == channel
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Immutable event envelope.
///
/// Fields are read through accessors; the `with_*` builders consume the
/// value, so nothing can change an event after it has been emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    event_id: String,
    event_type: EventType,
    priority: EventPriority,
    channel: NotificationChannel,
    timestamp: DateTime<Utc>,
    source: String,
    data: EventPayload,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl EventData {
    /// Build an event from an arbitrary type and payload.
    ///
    /// Fails when the payload belongs to another event family, e.g. an
    /// agent body tagged `file_changed`.
    pub fn try_new(event_type: EventType, data: EventPayload) -> Result<Self> {
        if !data.fits(event_type) {
            return Err(StreamError::InvalidEvent {
                message: format!("{} cannot carry this payload", event_type),
            });
        }
        Ok(Self::new(event_type, data))
    }

    /// Fresh id, the type's default channel and priority
    fn new(event_type: EventType, data: EventPayload) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            priority: event_type.default_priority(),
            channel: event_type.channel(),
            timestamp: Utc::now(),
            source: "engine".to_string(),
            data,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    // ------------------------------------------------------------------
    // Producer-family constructors
    // ------------------------------------------------------------------

    pub fn file_changed(file_path: impl Into<String>, change_type: FileChangeKind) -> Self {
        let event_type = match change_type {
            FileChangeKind::Created => EventType::FileCreated,
            FileChangeKind::Deleted => EventType::FileDeleted,
            FileChangeKind::Modified | FileChangeKind::Renamed => EventType::FileChanged,
        };
        Self::new(
            event_type,
            EventPayload::FileChange {
                file_path: file_path.into(),
                change_type,
                old_path: None,
                lines_added: None,
                lines_removed: None,
            },
        )
        .with_source("file_watcher")
    }

    pub fn analysis_completed(
        file_path: Option<String>,
        analysis_type: impl Into<String>,
        results: Value,
        confidence_score: Option<f64>,
    ) -> Self {
        Self::new(
            EventType::AnalysisCompleted,
            EventPayload::Analysis {
                file_path,
                analysis_type: analysis_type.into(),
                results,
                confidence_score,
                duration_ms: None,
            },
        )
        .with_source("analyzer")
    }

    pub fn violation_detected(
        file_path: impl Into<String>,
        rule_id: impl Into<String>,
        severity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            EventType::ViolationDetected,
            EventPayload::Violation {
                file_path: file_path.into(),
                rule_id: rule_id.into(),
                severity: severity.into(),
                message: message.into(),
                line: None,
                suggestion: None,
                confidence_score: None,
            },
        )
        .with_source("quality")
    }

    pub fn agent_activity(
        phase: AgentPhase,
        agent_id: impl Into<String>,
        action: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::new(
            phase.event_type(),
            EventPayload::Agent {
                agent_id: agent_id.into(),
                action: action.into(),
                status: status.into(),
                progress: None,
                message: None,
                file_path: None,
                confidence_score: None,
            },
        )
        .with_source("agent")
    }

    pub fn system_status(status: impl Into<String>, message: Option<String>) -> Self {
        Self::new(
            EventType::SystemStatus,
            EventPayload::System {
                status: status.into(),
                message,
                details: Value::Null,
            },
        )
        .with_source("system")
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    pub fn channel(&self) -> NotificationChannel {
        self.channel
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data(&self) -> &EventPayload {
        &self.data
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// File the event concerns, if its payload names one
    pub fn file_path(&self) -> Option<&str> {
        match &self.data {
            EventPayload::FileChange { file_path, .. } | EventPayload::Violation { file_path, .. } => {
                Some(file_path)
            }
            EventPayload::Analysis { file_path, .. } | EventPayload::Agent { file_path, .. } => {
                file_path.as_deref()
            }
            EventPayload::System { .. } => None,
        }
    }

    /// Producer confidence in the result, if the payload carries one
    pub fn confidence_score(&self) -> Option<f64> {
        match &self.data {
            EventPayload::Analysis { confidence_score, .. }
            | EventPayload::Violation { confidence_score, .. }
            | EventPayload::Agent { confidence_score, .. } => *confidence_score,
            EventPayload::FileChange { .. } | EventPayload::System { .. } => None,
        }
    }
}
