//! Broker liveness: heartbeats appear on the monitor stream and reach
//! registered peers.

use broker::BrokerConfig;
use chrono::DateTime;
use relay_protocol::MessageKind;
use relay_test_utils::{MonitorTap, TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn monitor_observes_a_heartbeat_within_one_period() {
    let cfg = BrokerConfig {
        heartbeat_period: Duration::from_millis(200),
        ..test_config()
    };
    let running = spawn_broker(cfg).await;
    let broker_id = running.broker.broker_id().to_owned();

    let mut monitor = MonitorTap::connect(running.monitor).await.unwrap();
    let heartbeat = monitor
        .recv_matching(Duration::from_secs(2), |m| m.kind == MessageKind::Heartbeat)
        .await
        .expect("monitor must observe a heartbeat within one period");
    assert_eq!(heartbeat.sender_id, broker_id);
    assert!(
        DateTime::parse_from_rfc3339(&heartbeat.payload).is_ok(),
        "heartbeat payload must be an RFC 3339 timestamp, got {:?}",
        heartbeat.payload
    );

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn registered_peers_receive_heartbeats() {
    let cfg = BrokerConfig {
        heartbeat_period: Duration::from_millis(200),
        ..test_config()
    };
    let running = spawn_broker(cfg).await;

    let mut service = TestPeer::connect(running.backend).await.unwrap();
    service.register(&registration("S1", "Deck", &[])).await.unwrap();

    let heartbeat = service
        .recv_matching(Duration::from_secs(2), |m| m.kind == MessageKind::Heartbeat)
        .await
        .expect("registered peer must receive heartbeats");
    assert_eq!(heartbeat.sender_id, running.broker.broker_id());

    running.broker.shutdown().await.unwrap();
}
