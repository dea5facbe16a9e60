//! Admission through the running service: priority, rate limit, channel, custom filters

use std::time::Duration;

use serde_json::json;

use stream_engine::events::{AgentPhase, EventData, EventPriority, FileChangeKind};
use stream_engine::streaming::{CustomFilter, CustomFilters};
use stream_engine::{ClientType, PreferencesUpdate};

use crate::common::*;

#[tokio::test]
async fn test_priority_floor_drops_low_events() {
    let service = running_service();
    let transport = RecordingTransport::new();
    service.register_client(
        "c1",
        ClientType::Web,
        transport.clone(),
        Some(PreferencesUpdate {
            min_priority: Some(EventPriority::High),
            ..deliver_everything()
        }),
    );

    service.emit_event(
        EventData::file_changed("a.rs", FileChangeKind::Modified).with_priority(EventPriority::Low),
    );
    service.emit_event(EventData::system_status("down", None).with_priority(EventPriority::Critical));

    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);
    settle().await;

    let messages = transport.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["priority"], "critical");
    assert_eq!(messages[0]["sequence_number"], 1);
}

#[tokio::test]
async fn test_rate_limit_sheds_burst_overflow() {
    let service = running_service();
    let transport = RecordingTransport::new();
    service.register_client(
        "c1",
        ClientType::Web,
        transport.clone(),
        Some(PreferencesUpdate {
            max_events_per_second: Some(5),
            ..deliver_everything()
        }),
    );

    for n in 0..10 {
        service.emit_event(EventData::file_changed(format!("f{n}.rs"), FileChangeKind::Modified));
    }

    assert!(wait_until(Duration::from_secs(2), || service.stats().rate_limited == 5).await);
    assert_eq!(transport.frame_count(), 5);

    // The first five of the burst are the ones delivered.
    let paths: Vec<String> = transport
        .messages()
        .iter()
        .map(|m| m["data"]["file_path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["f0.rs", "f1.rs", "f2.rs", "f3.rs", "f4.rs"]);
}

#[tokio::test]
async fn test_cli_profile_ignores_file_system_channel() {
    let service = running_service();
    let transport = RecordingTransport::new();
    let registration = service.register_client("term", ClientType::Cli, transport.clone(), None);
    assert!(!registration.preferences.enable_batching);

    service.emit_event(EventData::file_changed("a.rs", FileChangeKind::Modified));
    service.emit_event(EventData::violation_detected("a.rs", "no-unwrap", "error", "unwrap in lib"));

    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);
    settle().await;

    let messages = transport.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message_type"], "notification");
    assert_eq!(messages[0]["event_type"], "violation_detected");
    assert_eq!(messages[0]["channel"], "violations");
}

#[tokio::test]
async fn test_custom_filters_apply_per_client() {
    let service = running_service();
    let picky = RecordingTransport::new();
    let everything = RecordingTransport::new();

    service.register_client(
        "picky",
        ClientType::Web,
        picky.clone(),
        Some(PreferencesUpdate {
            custom_filters: Some(CustomFilters::new(vec![
                CustomFilter::ExcludeFilePatterns(vec!["node_modules".to_string()]),
                CustomFilter::MinConfidence(0.8),
            ])),
            ..deliver_everything()
        }),
    );
    service.register_client("all", ClientType::Web, everything.clone(), Some(deliver_everything()));

    service.emit_event(EventData::file_changed(
        "web/node_modules/react/index.js",
        FileChangeKind::Modified,
    ));
    service.emit_event(EventData::analysis_completed(
        Some("src/lib.rs".to_string()),
        "complexity",
        json!({"score": 3}),
        Some(0.5),
    ));
    service.emit_event(EventData::analysis_completed(
        Some("src/lib.rs".to_string()),
        "complexity",
        json!({"score": 9}),
        Some(0.95),
    ));

    assert!(wait_until(Duration::from_secs(2), || everything.frame_count() == 3).await);
    settle().await;

    let picked = picky.messages();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0]["data"]["confidence_score"], 0.95);
}

#[tokio::test]
async fn test_preference_update_applies_to_next_event() {
    let service = running_service();
    let transport = RecordingTransport::new();
    service.register_client("c1", ClientType::Web, transport.clone(), Some(deliver_everything()));

    service.emit_event(EventData::agent_activity(AgentPhase::Started, "a1", "scan", "running"));
    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);

    let updated = service
        .update_preferences(
            "c1",
            &PreferencesUpdate {
                min_priority: Some(EventPriority::Critical),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.min_priority, EventPriority::Critical);
    // Untouched fields keep their value.
    assert!(!updated.enable_batching);

    service.emit_event(EventData::agent_activity(AgentPhase::Error, "a1", "scan", "failed"));
    service.emit_event(EventData::system_status("halt", None).with_priority(EventPriority::Critical));

    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 2).await);
    settle().await;
    let messages = transport.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["event_type"], "system_status");
    assert_eq!(messages[1]["sequence_number"], 2);

    assert!(service
        .update_preferences("nobody", &PreferencesUpdate::default())
        .is_none());
}
