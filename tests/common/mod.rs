//! Common test utilities for stream-engine integration tests
//!
//! This module provides:
//! - `RecordingTransport` that keeps every frame it is handed
//! - `FailingTransport` that rejects every send
//! - Helpers to build a running service and wait on asynchronous delivery

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use stream_engine::events::EventPriority;
use stream_engine::streaming::decompress;
use stream_engine::{
    EventStreamingService, OutboundFrame, PreferencesUpdate, StreamError, StreamingConfig,
    Transport,
};

/// Transport that records frames; can be broken at any point
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<OutboundFrame>>,
    broken: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Every frame decoded to JSON, gunzipping binary frames
    pub fn messages(&self) -> Vec<Value> {
        self.frames().iter().map(decode_frame).collect()
    }

    pub fn break_transport(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: OutboundFrame) -> stream_engine::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StreamError::TransportClosed {
                client_id: "recording".to_string(),
            });
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Transport whose every send fails
#[derive(Default)]
pub struct FailingTransport {
    pub attempts: AtomicUsize,
}

impl Transport for FailingTransport {
    fn send(&self, _frame: OutboundFrame) -> stream_engine::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StreamError::TransportClosed {
            client_id: "failing".to_string(),
        })
    }
}

pub fn decode_frame(frame: &OutboundFrame) -> Value {
    let text = match frame {
        OutboundFrame::Text(text) => text.clone(),
        OutboundFrame::Binary(bytes) => decompress(bytes).expect("binary frame is gzip JSON"),
    };
    serde_json::from_str(&text).expect("frame is JSON")
}

/// Event ids carried by a notification or batch message, in order
pub fn event_ids(message: &Value) -> Vec<String> {
    match message["message_type"].as_str() {
        Some("batch_notification") => message["data"]["events"]
            .as_array()
            .expect("batch has events")
            .iter()
            .map(|e| e["event_id"].as_str().unwrap_or_default().to_string())
            .collect(),
        _ => vec![message["event_id"].as_str().unwrap_or_default().to_string()],
    }
}

/// Started service with default configuration
pub fn running_service() -> Arc<EventStreamingService> {
    running_service_with(StreamingConfig::default())
}

pub fn running_service_with(config: StreamingConfig) -> Arc<EventStreamingService> {
    let service = Arc::new(EventStreamingService::new(config));
    service.start().expect("service starts");
    service
}

/// Preferences that deliver everything immediately and uncompressed
pub fn deliver_everything() -> PreferencesUpdate {
    PreferencesUpdate {
        min_priority: Some(EventPriority::Debug),
        max_events_per_second: Some(0),
        enable_batching: Some(false),
        enable_compression: Some(false),
        ..Default::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let the dispatch loop drain what is queued
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
