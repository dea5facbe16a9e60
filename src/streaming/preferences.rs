//! Per-client delivery preferences and client-type default profiles
//!
//! Preferences arrive from clients as JSON and may be partial; anything
//! missing falls back to the profile derived from the client's user agent.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::{EventData, EventPriority, NotificationChannel};

// ============================================================================
// Client classification
// ============================================================================

/// Kind of client on the other end of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Ios,
    Cli,
    Web,
    Unknown,
}

impl ClientType {
    /// Classify a user-agent string by substring match.
    ///
    /// iOS markers are checked first since mobile Safari also advertises
    /// `Mozilla`.
    pub fn detect(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return Self::Unknown;
        };
        let ua = ua.to_ascii_lowercase();

        if ["ios", "iphone", "ipad", "cfnetwork"].iter().any(|m| ua.contains(m)) {
            Self::Ios
        } else if ["cli", "terminal", "curl"].iter().any(|m| ua.contains(m)) {
            Self::Cli
        } else if ["mozilla", "chrome", "safari", "firefox", "edge"]
            .iter()
            .any(|m| ua.contains(m))
        {
            Self::Web
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Cli => "cli",
            Self::Web => "web",
            Self::Unknown => "unknown",
        }
    }

    /// Default delivery profile for this kind of client
    pub fn default_preferences(&self, client_id: impl Into<String>) -> ClientPreferences {
        let client_id = client_id.into();
        match self {
            Self::Ios => ClientPreferences {
                client_id,
                enabled_channels: BTreeSet::from([NotificationChannel::All]),
                min_priority: EventPriority::Medium,
                max_events_per_second: 5,
                enable_batching: true,
                batch_interval_ms: 1000,
                enable_compression: false,
                custom_filters: CustomFilters::default(),
            },
            Self::Cli => ClientPreferences {
                client_id,
                enabled_channels: BTreeSet::from([
                    NotificationChannel::Analysis,
                    NotificationChannel::Violations,
                    NotificationChannel::Agent,
                ]),
                min_priority: EventPriority::High,
                max_events_per_second: 20,
                enable_batching: false,
                batch_interval_ms: 100,
                enable_compression: true,
                custom_filters: CustomFilters::default(),
            },
            Self::Web | Self::Unknown => ClientPreferences {
                client_id,
                enabled_channels: BTreeSet::from([NotificationChannel::All]),
                min_priority: EventPriority::Medium,
                max_events_per_second: 10,
                enable_batching: true,
                batch_interval_ms: 500,
                enable_compression: false,
                custom_filters: CustomFilters::default(),
            },
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// Delivery policy for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPreferences {
    pub client_id: String,
    pub enabled_channels: BTreeSet<NotificationChannel>,
    pub min_priority: EventPriority,
    /// Admissions per rolling window; 0 disables the limit
    pub max_events_per_second: u32,
    pub enable_batching: bool,
    pub batch_interval_ms: u64,
    pub enable_compression: bool,
    #[serde(default)]
    pub custom_filters: CustomFilters,
}

impl ClientPreferences {
    pub fn accepts_channel(&self, channel: NotificationChannel) -> bool {
        self.enabled_channels.contains(&NotificationChannel::All)
            || self.enabled_channels.contains(&channel)
    }
}

/// Partial preferences sent by a client.
///
/// Every field is optional; [`apply_to`](Self::apply_to) keeps the base
/// value for anything left out. `client_id` is accepted for wire
/// compatibility but identity always comes from the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_channels: Option<BTreeSet<NotificationChannel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<EventPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_events_per_second: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_batching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_compression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filters: Option<CustomFilters>,
}

impl PreferencesUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled_channels.is_none()
            && self.min_priority.is_none()
            && self.max_events_per_second.is_none()
            && self.enable_batching.is_none()
            && self.batch_interval_ms.is_none()
            && self.enable_compression.is_none()
            && self.custom_filters.is_none()
    }

    pub fn apply_to(&self, base: &ClientPreferences) -> ClientPreferences {
        ClientPreferences {
            client_id: base.client_id.clone(),
            enabled_channels: self
                .enabled_channels
                .clone()
                .unwrap_or_else(|| base.enabled_channels.clone()),
            min_priority: self.min_priority.unwrap_or(base.min_priority),
            max_events_per_second: self
                .max_events_per_second
                .unwrap_or(base.max_events_per_second),
            enable_batching: self.enable_batching.unwrap_or(base.enable_batching),
            batch_interval_ms: self.batch_interval_ms.unwrap_or(base.batch_interval_ms),
            enable_compression: self.enable_compression.unwrap_or(base.enable_compression),
            custom_filters: self
                .custom_filters
                .clone()
                .unwrap_or_else(|| base.custom_filters.clone()),
        }
    }
}

// ============================================================================
// Custom filters
// ============================================================================

/// A named predicate a client can attach to its preferences
#[derive(Debug, Clone, PartialEq)]
pub enum CustomFilter {
    /// Reject events whose file path contains any of these substrings
    ExcludeFilePatterns(Vec<String>),
    /// Reject events whose confidence score is below the floor
    MinConfidence(f64),
}

impl CustomFilter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExcludeFilePatterns(_) => "exclude_file_patterns",
            Self::MinConfidence(_) => "min_confidence",
        }
    }

    /// Whether the event passes this filter.
    ///
    /// Events that carry no file path or confidence score pass the
    /// corresponding filter.
    pub fn admits(&self, event: &EventData) -> bool {
        match self {
            Self::ExcludeFilePatterns(patterns) => match event.file_path() {
                Some(path) => !patterns.iter().any(|p| path.contains(p.as_str())),
                None => true,
            },
            Self::MinConfidence(floor) => match event.confidence_score() {
                Some(score) => score >= *floor,
                None => true,
            },
        }
    }

    fn parse(name: &str, value: &Value) -> Option<Self> {
        match name {
            "exclude_file_patterns" => {
                let patterns = match value {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => {
                        tracing::warn!("Ignoring exclude_file_patterns with non-string value");
                        return None;
                    }
                };
                Some(Self::ExcludeFilePatterns(patterns))
            }
            "min_confidence" => match value.as_f64() {
                Some(floor) => Some(Self::MinConfidence(floor)),
                None => {
                    tracing::warn!("Ignoring min_confidence with non-numeric value");
                    None
                }
            },
            other => {
                tracing::debug!("Ignoring unknown custom filter '{}'", other);
                None
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::ExcludeFilePatterns(patterns) => Value::from(patterns.clone()),
            Self::MinConfidence(floor) => Value::from(*floor),
        }
    }
}

/// The set of custom filters attached to a client.
///
/// On the wire this is a JSON object keyed by filter name. Names this
/// engine does not know are dropped while parsing, so they never affect
/// delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CustomFilters {
    filters: Vec<CustomFilter>,
}

impl CustomFilters {
    pub fn new(filters: Vec<CustomFilter>) -> Self {
        Self { filters }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomFilter> {
        self.filters.iter()
    }

    pub fn admits(&self, event: &EventData) -> bool {
        self.filters.iter().all(|f| f.admits(event))
    }
}

impl From<Map<String, Value>> for CustomFilters {
    fn from(map: Map<String, Value>) -> Self {
        let filters = map
            .iter()
            .filter_map(|(name, value)| CustomFilter::parse(name, value))
            .collect();
        Self { filters }
    }
}

impl From<CustomFilters> for Map<String, Value> {
    fn from(filters: CustomFilters) -> Self {
        filters
            .iter()
            .map(|f| (f.name().to_string(), f.to_value()))
            .collect()
    }
}
