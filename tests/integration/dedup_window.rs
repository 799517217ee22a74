//! Retransmissions of the same message id inside the dedup window are
//! dropped before routing.

use relay_protocol::{Message, MessageKind};
use relay_test_utils::{TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn duplicate_id_is_delivered_exactly_once() {
    let running = spawn_broker(test_config()).await;
    let mut receiver = TestPeer::connect(running.backend).await.unwrap();
    receiver.register(&registration("R1", "Deck", &[])).await.unwrap();
    let mut sender = TestPeer::connect(running.frontend).await.unwrap();

    let mut msg = Message::new(MessageKind::Domain("Draw".to_owned()), "C1").with_receiver("R1");
    msg.id = "m12".to_owned();
    sender.send(&msg).await.unwrap();
    sender.send(&msg).await.unwrap();
    let mut follow_up =
        Message::new(MessageKind::Domain("Draw".to_owned()), "C1").with_receiver("R1");
    follow_up.id = "m13".to_owned();
    sender.send(&follow_up).await.unwrap();

    // FIFO per (sender, receiver): if the duplicate had been routed it
    // would arrive between m12 and m13.
    let first = receiver
        .recv_matching(Duration::from_secs(5), |m| m.kind.as_str() == "Draw")
        .await
        .unwrap();
    assert_eq!(first.id, "m12");
    let second = receiver
        .recv_matching(Duration::from_secs(5), |m| m.kind.as_str() == "Draw")
        .await
        .unwrap();
    assert_eq!(second.id, "m13");
    assert_eq!(running.broker.metrics().duplicates, 1);

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn duplicate_pings_are_still_acknowledged() {
    let running = spawn_broker(test_config()).await;
    let mut client = TestPeer::connect(running.frontend).await.unwrap();

    let mut ping = Message::new(MessageKind::Ping, "C1");
    ping.id = "p1".to_owned();
    client.send(&ping).await.unwrap();
    client.send(&ping).await.unwrap();

    for _ in 0..2 {
        let ack = client
            .recv_matching(Duration::from_secs(5), |m| {
                m.kind == MessageKind::Acknowledgment && m.in_response_to == "p1"
            })
            .await;
        assert!(ack.is_some(), "every ping send must be acknowledged");
    }

    running.broker.shutdown().await.unwrap();
}
