//! Bounded retries: a silent receiver sees the original delivery plus
//! `max_retries` identical retransmissions, then the entry is dropped.

use broker::BrokerConfig;
use relay_protocol::{Message, MessageKind};
use relay_test_utils::{TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn silent_receiver_sees_four_arrivals_then_tracking_stops() {
    let cfg = BrokerConfig {
        ack_deadline: Duration::from_millis(500),
        ack_sweep_interval: Duration::from_millis(100),
        max_retries: 3,
        ..test_config()
    };
    let running = spawn_broker(cfg).await;

    let mut silent = TestPeer::connect(running.backend).await.unwrap();
    silent.register(&registration("silent", "Deck", &[])).await.unwrap();
    let mut sender = TestPeer::connect(running.frontend).await.unwrap();

    let mut msg = Message::new(MessageKind::Request, "C1")
        .with_receiver("silent")
        .requiring_ack();
    msg.id = "m20".to_owned();
    sender.send(&msg).await.unwrap();

    // Original + 3 retries, all byte-identical.
    for arrival in 1..=4 {
        let seen = silent
            .recv_matching(Duration::from_secs(3), |m| m.id == "m20")
            .await
            .unwrap_or_else(|| panic!("arrival {arrival} of m20 missing"));
        assert_eq!(seen.kind, MessageKind::Request);
        assert_eq!(seen.receiver_id, "silent");
    }

    // No fifth arrival, and the pending entry is gone.
    let extra = silent
        .recv_matching(Duration::from_millis(1500), |m| m.id == "m20")
        .await;
    assert!(extra.is_none(), "retries must stop after the budget is spent");
    assert_eq!(running.broker.pending_ack_count(), 0);
    assert_eq!(running.broker.metrics().ack_timeouts, 1);
    assert_eq!(running.broker.metrics().retransmissions, 3);

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn acknowledged_delivery_is_never_retried() {
    let cfg = BrokerConfig {
        ack_deadline: Duration::from_millis(300),
        ack_sweep_interval: Duration::from_millis(50),
        ..test_config()
    };
    let running = spawn_broker(cfg).await;

    let mut responsive = TestPeer::connect(running.backend).await.unwrap();
    responsive.register(&registration("S1", "Deck", &[])).await.unwrap();
    let mut sender = TestPeer::connect(running.frontend).await.unwrap();
    sender.register(&registration("C1", "Client", &[])).await.unwrap();

    let msg = Message::new(MessageKind::Request, "C1")
        .with_receiver("S1")
        .requiring_ack();
    let id = msg.id.clone();
    sender.send(&msg).await.unwrap();

    let delivered = responsive
        .recv_matching(Duration::from_secs(3), |m| m.id == id)
        .await
        .unwrap();
    responsive
        .send(&Message::ack_for(&delivered, "S1"))
        .await
        .unwrap();

    // The sender observes the acknowledgment round trip.
    let observed = sender
        .recv_matching(Duration::from_secs(3), |m| {
            m.kind == MessageKind::Acknowledgment && m.in_response_to == id
        })
        .await;
    assert!(observed.is_some(), "sender must observe the acknowledgment");

    // And the silent-retry machinery stays quiet.
    let retry = responsive
        .recv_matching(Duration::from_millis(800), |m| m.id == id)
        .await;
    assert!(retry.is_none(), "acked delivery must not be retransmitted");
    assert_eq!(running.broker.pending_ack_count(), 0);

    running.broker.shutdown().await.unwrap();
}
