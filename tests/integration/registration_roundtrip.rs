//! Registration round-trip: ack, re-broadcast, registry count, and
//! removal on disconnect.

use relay_protocol::{Message, MessageKind, ServiceRegistration};
use relay_test_utils::{MonitorTap, TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn registration_is_acked_rebroadcast_and_counted() {
    let running = spawn_broker(test_config()).await;
    let mut monitor = MonitorTap::connect(running.monitor).await.unwrap();
    let mut s1 = TestPeer::connect(running.backend).await.unwrap();

    let mut alice = registration("S1", "Deck", &["shuffle"]);
    alice.service_name = "Alice".to_owned();
    let mut hello = Message::new(MessageKind::ServiceRegistration, "S1").requiring_ack();
    hello.id = "m1".to_owned();
    hello.set_payload(&alice).unwrap();
    s1.send(&hello).await.unwrap();

    let ack = s1
        .recv_matching(Duration::from_secs(5), |m| {
            m.kind == MessageKind::Acknowledgment
        })
        .await
        .expect("broker must acknowledge the registration");
    assert_eq!(ack.in_response_to, "m1");

    // The registration is re-broadcast with a freshly generated id.
    let rebroadcast = monitor
        .recv_matching(Duration::from_secs(5), |m| {
            m.kind == MessageKind::ServiceRegistration
        })
        .await
        .expect("monitor must observe the re-broadcast");
    assert_ne!(rebroadcast.id, "m1");
    let carried: ServiceRegistration = rebroadcast.payload_as().unwrap();
    assert_eq!(carried.service_id, "S1");
    assert_eq!(carried.service_name, "Alice");
    assert_eq!(carried.service_type, "Deck");
    assert_eq!(carried.capabilities, vec!["shuffle"]);

    assert_eq!(running.broker.service_count().await, 1);
    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn resending_a_registration_is_an_idempotent_refresh() {
    let running = spawn_broker(test_config()).await;
    let mut s1 = TestPeer::connect(running.backend).await.unwrap();

    s1.register(&registration("S1", "Deck", &["shuffle"])).await.unwrap();
    s1.register(&registration("S1", "Deck", &["shuffle"])).await.unwrap();

    assert_eq!(running.broker.service_count().await, 1);
    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_removes_the_registration() {
    let running = spawn_broker(test_config()).await;
    let mut s1 = TestPeer::connect(running.backend).await.unwrap();
    s1.register(&registration("S1", "Deck", &[])).await.unwrap();
    assert_eq!(running.broker.service_count().await, 1);

    drop(s1);
    let mut removed = false;
    for _ in 0..100 {
        if running.broker.service_count().await == 0 {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(removed, "registration must be removed when the session ends");
    running.broker.shutdown().await.unwrap();
}
