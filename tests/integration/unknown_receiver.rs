//! A message naming an unregistered receiver is answered with a 404
//! error reply; nothing is routed.

use relay_protocol::{ErrorPayload, Message, MessageKind};
use relay_test_utils::{TestPeer, spawn_broker, test_config};
use std::time::Duration;

#[tokio::test]
async fn unknown_receiver_yields_error_404() {
    let running = spawn_broker(test_config()).await;
    let mut client = TestPeer::connect(running.frontend).await.unwrap();

    let mut request = Message::new(MessageKind::Request, "C1").with_receiver("ghost");
    request.id = "m9".to_owned();
    client.send(&request).await.unwrap();

    let reply = client
        .recv_matching(Duration::from_secs(5), |m| m.in_response_to == "m9")
        .await
        .expect("broker must answer with an error");
    assert_eq!(reply.kind, MessageKind::Error);
    let payload: ErrorPayload = reply.payload_as().unwrap();
    assert_eq!(payload.error_code, 404);
    assert_eq!(payload.message, "Unknown service: ghost");
    assert_eq!(running.broker.metrics().unknown_receiver, 1);

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_frames_are_counted_and_dropped() {
    let running = spawn_broker(test_config()).await;
    let mut client = TestPeer::connect(running.frontend).await.unwrap();

    client.send_text("{not json".to_owned()).await.unwrap();
    client
        .send_text(r#"{"id":"","kind":"Ping"}"#.to_owned())
        .await
        .unwrap();

    // The session survives; a well-formed ping still gets its ack.
    let ping = Message::new(MessageKind::Ping, "C1");
    let ping_id = ping.id.clone();
    client.send(&ping).await.unwrap();
    let ack = client
        .recv_matching(Duration::from_secs(5), |m| m.in_response_to == ping_id)
        .await
        .expect("ping must still be acknowledged");
    assert_eq!(ack.kind, MessageKind::Acknowledgment);
    assert_eq!(running.broker.metrics().malformed, 2);

    running.broker.shutdown().await.unwrap();
}
