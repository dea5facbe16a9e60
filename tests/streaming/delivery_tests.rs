//! Fan-out, failure isolation, sequence numbering and statistics

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use stream_engine::events::{AgentPhase, EventData, EventPriority, FileChangeKind};
use stream_engine::streaming::SessionPhase;
use stream_engine::{ClientType, EventStreamingService, StreamingConfig};

use crate::common::*;

#[tokio::test]
async fn test_every_client_gets_its_own_copy() {
    let service = running_service();
    let clients: Vec<_> = (0..3)
        .map(|n| {
            let transport = RecordingTransport::new();
            service.register_client(
                &format!("c{n}"),
                ClientType::Web,
                transport.clone(),
                Some(deliver_everything()),
            );
            transport
        })
        .collect();

    let event = EventData::file_changed("src/main.rs", FileChangeKind::Created);
    let id = event.event_id().to_string();
    service.emit_event(event);

    for transport in &clients {
        assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);
        let message = &transport.messages()[0];
        assert_eq!(message["event_id"], id.as_str());
        assert_eq!(message["event_type"], "file_created");
        assert_eq!(message["sequence_number"], 1);
    }
}

#[tokio::test]
async fn test_failing_client_does_not_block_others() {
    let service = running_service();
    let healthy = RecordingTransport::new();
    let failing = Arc::new(FailingTransport::default());

    service.register_client("good", ClientType::Web, healthy.clone(), Some(deliver_everything()));
    service.register_client("bad", ClientType::Web, failing.clone(), Some(deliver_everything()));

    for n in 0..5 {
        service.emit_event(EventData::file_changed(format!("f{n}.rs"), FileChangeKind::Modified));
    }

    assert!(wait_until(Duration::from_secs(2), || healthy.frame_count() == 5).await);

    // One failed attempt, then the client is out of the fan-out.
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
    assert!(!service.is_registered("bad"));
    assert_eq!(service.session_phase("bad"), SessionPhase::Grace);

    let stats = service.stats();
    assert_eq!(stats.failed_deliveries, 1);
    assert_eq!(stats.connected_clients, 1);
    assert_eq!(stats.messages_sent, 5);

    let sequences: Vec<u64> = healthy
        .messages()
        .iter()
        .map(|m| m["sequence_number"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_transport_breaking_mid_stream() {
    let service = running_service();
    let transport = RecordingTransport::new();
    service.register_client("c1", ClientType::Web, transport.clone(), Some(deliver_everything()));

    service.emit_event(EventData::system_status("one", None));
    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);

    transport.break_transport();
    service.emit_event(EventData::system_status("two", None));
    assert!(wait_until(Duration::from_secs(2), || !service.is_registered("c1")).await);

    let info = service.get_connection_info();
    assert_eq!(info.total_connections, 0);
    assert_eq!(info.clients_in_grace.len(), 1);
    assert_eq!(info.clients_in_grace[0].client_id, "c1");
    assert_eq!(info.clients_in_grace[0].missed_events, 1);
}

#[tokio::test]
async fn test_stats_count_accepted_not_delivered() {
    let service = running_service();
    let transport = RecordingTransport::new();
    service.register_client(
        "c1",
        ClientType::Web,
        transport.clone(),
        Some(stream_engine::PreferencesUpdate {
            min_priority: Some(EventPriority::Critical),
            ..deliver_everything()
        }),
    );

    service.emit_event(EventData::file_changed("a.rs", FileChangeKind::Modified));
    service.emit_event(EventData::violation_detected("a.rs", "r1", "error", "m"));
    service.emit_event(EventData::agent_activity(AgentPhase::Progress, "a1", "scan", "50%"));
    service.emit_event(EventData::system_status("down", None).with_priority(EventPriority::Critical));

    // Counted before dispatch even looks at them.
    let stats = service.stats();
    assert_eq!(stats.total_events, 4);
    assert_eq!(stats.by_type["file_changed"], 1);
    assert_eq!(stats.by_type["violation_detected"], 1);
    assert_eq!(stats.by_priority["medium"], 1);
    assert_eq!(stats.by_priority["high"], 1);
    assert_eq!(stats.by_priority["low"], 1);
    assert_eq!(stats.by_priority["critical"], 1);

    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);
    settle().await;
    assert_eq!(service.stats().messages_sent, 1);

    service.reset_stats();
    let stats = service.stats();
    assert_eq!(stats.total_events, 0);
    assert!(stats.by_type.is_empty());
    assert_eq!(stats.messages_sent, 0);
    assert_eq!(stats.connected_clients, 1);
}

#[tokio::test]
async fn test_connection_info_reports_clients() {
    let service = running_service();
    service.register_client("web-1", ClientType::Web, RecordingTransport::new(), None);
    service.register_client("cli-1", ClientType::Cli, RecordingTransport::new(), None);

    let info = service.get_connection_info();
    assert_eq!(info.total_connections, 2);
    assert_eq!(info.connected_clients, vec!["cli-1".to_string(), "web-1".to_string()]);
    assert_eq!(info.client_details["cli-1"].client_type, ClientType::Cli);
    assert!(info.client_details["web-1"].active);
    assert_eq!(info.client_details["web-1"].sequence_number, 0);
    assert_eq!(info.streaming_stats.connected_clients, 2);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["client_details"]["cli-1"]["client_type"], "cli");
    assert_eq!(json["streaming_stats"]["connected_clients"], 2);
}

#[tokio::test]
async fn test_events_queued_while_stopped_are_delivered_after_restart() {
    let service = Arc::new(EventStreamingService::new(StreamingConfig::default()));
    let transport = RecordingTransport::new();
    service.register_client("c1", ClientType::Web, transport.clone(), Some(deliver_everything()));

    service.emit_event(EventData::system_status("queued", None));
    settle().await;
    assert_eq!(transport.frame_count(), 0);

    service.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 1).await);

    service.stop().await.unwrap();
    service.emit_event(EventData::system_status("while stopped", None));
    settle().await;
    assert_eq!(transport.frame_count(), 1);

    service.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || transport.frame_count() == 2).await);
    assert_eq!(transport.messages()[1]["sequence_number"], 2);
    service.stop().await.unwrap();
}
