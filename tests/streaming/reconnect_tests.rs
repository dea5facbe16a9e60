//! Grace sessions: missed events, ordered replay, expiry

use std::time::Duration;

use stream_engine::config::ReconnectionConfig;
use stream_engine::events::{EventData, EventPriority, FileChangeKind};
use stream_engine::streaming::SessionPhase;
use stream_engine::{ClientType, PreferencesUpdate, StreamingConfig};

use crate::common::*;

#[tokio::test]
async fn test_reconnect_replays_missed_events_in_order() {
    let service = running_service();
    let first = RecordingTransport::new();
    service.register_client(
        "phone",
        ClientType::Web,
        first.clone(),
        Some(PreferencesUpdate {
            min_priority: Some(EventPriority::Low),
            ..deliver_everything()
        }),
    );

    service.emit_event(EventData::system_status("before", None));
    assert!(wait_until(Duration::from_secs(2), || first.frame_count() == 1).await);

    assert!(service.unregister_client("phone"));
    assert_eq!(service.session_phase("phone"), SessionPhase::Grace);

    let missed: Vec<EventData> = (0..3)
        .map(|n| EventData::file_changed(format!("m{n}.rs"), FileChangeKind::Modified))
        .collect();
    let missed_ids: Vec<String> = missed.iter().map(|e| e.event_id().to_string()).collect();
    for event in missed {
        service.emit_event(event);
    }
    // Below the client's floor: never recorded.
    service.emit_event(EventData::system_status("noise", None).with_priority(EventPriority::Debug));
    assert!(wait_until(Duration::from_secs(2), || service.stats().missed_events_recorded == 3).await);
    settle().await;

    let second = RecordingTransport::new();
    let registration = service.register_client(
        "phone",
        ClientType::Web,
        second.clone(),
        Some(PreferencesUpdate {
            min_priority: Some(EventPriority::Medium),
            ..Default::default()
        }),
    );
    assert!(registration.resumed);
    assert_eq!(registration.replayed, 3);
    // Preferences survive the gap; the update is merged over them.
    assert!(!registration.preferences.enable_batching);
    assert_eq!(registration.preferences.min_priority, EventPriority::Medium);

    // Replay lands synchronously, before anything new.
    let replay = second.messages();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0]["message_type"], "batch_notification");
    assert_eq!(replay[0]["batch_info"]["replayed"], true);
    assert_eq!(replay[0]["sequence_number"], 2);
    assert_eq!(event_ids(&replay[0]), missed_ids);

    service.emit_event(EventData::system_status("after", None));
    assert!(wait_until(Duration::from_secs(2), || second.frame_count() == 2).await);
    let live = &second.messages()[1];
    assert_eq!(live["message_type"], "notification");
    assert!(live.get("batch_info").is_none());
    assert_eq!(live["sequence_number"], 3);

    assert_eq!(first.frame_count(), 1);
    assert_eq!(service.session_phase("phone"), SessionPhase::Connected);
    assert_eq!(service.stats().missed_events_replayed, 3);
    assert!(service.get_connection_info().clients_in_grace.is_empty());
}

#[tokio::test]
async fn test_replay_is_chunked_by_batch_cap() {
    let mut config = StreamingConfig::default();
    config.batching.max_batch_size = 4;
    let service = running_service_with(config);

    service.register_client("c1", ClientType::Web, RecordingTransport::new(), Some(deliver_everything()));
    service.unregister_client("c1");

    for n in 0..10 {
        service.emit_event(EventData::file_changed(format!("f{n}.rs"), FileChangeKind::Modified));
    }
    assert!(wait_until(Duration::from_secs(2), || service.stats().missed_events_recorded == 10).await);

    let transport = RecordingTransport::new();
    let registration = service.register_client("c1", ClientType::Web, transport.clone(), None);
    assert_eq!(registration.replayed, 10);

    let counts: Vec<u64> = transport
        .messages()
        .iter()
        .map(|m| m["batch_info"]["event_count"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, vec![4, 4, 2]);

    let paths: Vec<String> = transport
        .messages()
        .iter()
        .flat_map(|m| m["data"]["events"].as_array().unwrap().clone())
        .map(|e| e["data"]["file_path"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..10).map(|n| format!("f{n}.rs")).collect();
    assert_eq!(paths, expected);
}

#[tokio::test]
async fn test_single_missed_event_replays_as_counted_batch() {
    let service = running_service();
    service.register_client("c1", ClientType::Web, RecordingTransport::new(), Some(deliver_everything()));
    service.unregister_client("c1");

    service.emit_event(EventData::system_status("only", None));
    assert!(wait_until(Duration::from_secs(2), || service.stats().missed_events_recorded == 1).await);

    let transport = RecordingTransport::new();
    let registration = service.register_client("c1", ClientType::Web, transport.clone(), None);
    assert_eq!(registration.replayed, 1);

    let replay = &transport.messages()[0];
    assert_eq!(replay["message_type"], "batch_notification");
    assert_eq!(replay["batch_info"]["event_count"], 1);

    let stats = service.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.batches_sent, 1);
}

#[tokio::test]
async fn test_missed_buffer_keeps_newest() {
    let mut config = StreamingConfig::default();
    config.reconnection = ReconnectionConfig {
        max_missed_events: 3,
        ..ReconnectionConfig::default()
    };
    let service = running_service_with(config);

    service.register_client("c1", ClientType::Web, RecordingTransport::new(), Some(deliver_everything()));
    service.unregister_client("c1");

    for n in 0..6 {
        service.emit_event(EventData::file_changed(format!("f{n}.rs"), FileChangeKind::Modified));
    }
    assert!(wait_until(Duration::from_secs(2), || {
        service
            .get_connection_info()
            .clients_in_grace
            .first()
            .map(|g| g.dropped_missed_events == 3)
            .unwrap_or(false)
    })
    .await);

    let transport = RecordingTransport::new();
    let registration = service.register_client("c1", ClientType::Web, transport.clone(), None);
    assert_eq!(registration.replayed, 3);

    let paths: Vec<String> = transport.messages()[0]["data"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["data"]["file_path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["f3.rs", "f4.rs", "f5.rs"]);
}

#[tokio::test]
async fn test_expired_grace_starts_fresh_session() {
    let mut config = StreamingConfig::default();
    config.reconnection = ReconnectionConfig {
        grace_period_secs: 1,
        purge_interval_secs: 1,
        ..ReconnectionConfig::default()
    };
    let service = running_service_with(config);

    let first = RecordingTransport::new();
    service.register_client("c1", ClientType::Web, first.clone(), Some(deliver_everything()));
    service.emit_event(EventData::system_status("hello", None));
    assert!(wait_until(Duration::from_secs(2), || first.frame_count() == 1).await);

    service.unregister_client("c1");
    service.emit_event(EventData::system_status("missed", None));
    assert!(wait_until(Duration::from_secs(2), || service.stats().missed_events_recorded == 1).await);

    // The sweeper evicts the session once the window has passed.
    assert!(
        wait_until(Duration::from_secs(4), || service.session_phase("c1") == SessionPhase::Purged)
            .await
    );
    assert!(
        wait_until(Duration::from_secs(3), || service
            .get_connection_info()
            .clients_in_grace
            .is_empty())
        .await
    );

    let second = RecordingTransport::new();
    let registration = service.register_client("c1", ClientType::Web, second.clone(), None);
    assert!(!registration.resumed);
    assert_eq!(registration.replayed, 0);
    // Fresh session: back to the web profile, numbering restarts.
    assert!(registration.preferences.enable_batching);
    assert_eq!(second.frame_count(), 0);
}
