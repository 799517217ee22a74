//! FIFO per (sender, receiver) pair: delivery order equals send order.

use relay_protocol::{Message, MessageKind};
use relay_test_utils::{TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn point_to_point_order_is_preserved() {
    let running = spawn_broker(test_config()).await;
    let mut receiver = TestPeer::connect(running.backend).await.unwrap();
    receiver.register(&registration("R1", "Deck", &[])).await.unwrap();
    let mut sender = TestPeer::connect(running.frontend).await.unwrap();

    const COUNT: usize = 50;
    for n in 0..COUNT {
        let mut msg =
            Message::new(MessageKind::Domain("Tick".to_owned()), "C1").with_receiver("R1");
        msg.id = format!("ord-{n}");
        msg.payload = n.to_string();
        sender.send(&msg).await.unwrap();
    }

    for n in 0..COUNT {
        let seen = receiver
            .recv_matching(Duration::from_secs(5), |m| m.kind.as_str() == "Tick")
            .await
            .unwrap_or_else(|| panic!("message {n} missing"));
        assert_eq!(seen.id, format!("ord-{n}"), "out-of-order delivery at {n}");
    }

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_order_is_preserved_per_receiver() {
    let running = spawn_broker(test_config()).await;
    let mut observer = TestPeer::connect(running.backend).await.unwrap();
    observer.register(&registration("R1", "Deck", &[])).await.unwrap();
    let mut sender = TestPeer::connect(running.frontend).await.unwrap();

    const COUNT: usize = 20;
    for n in 0..COUNT {
        let mut msg = Message::new(MessageKind::Domain("Note".to_owned()), "C1");
        msg.id = format!("bc-{n}");
        sender.send(&msg).await.unwrap();
    }

    for n in 0..COUNT {
        let seen = observer
            .recv_matching(Duration::from_secs(5), |m| m.kind.as_str() == "Note")
            .await
            .unwrap_or_else(|| panic!("broadcast {n} missing"));
        assert_eq!(seen.id, format!("bc-{n}"));
    }

    running.broker.shutdown().await.unwrap();
}
