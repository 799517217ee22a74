//! Client library behavior against a live broker: connect handshake,
//! request/response correlation, peer cache, and disconnect semantics.

use relay_client::{Client, ClientConfig, ClientError};
use relay_protocol::MessageKind;
use relay_test_utils::{spawn_broker, test_config};
use std::time::Duration;

fn client_config(addr: std::net::SocketAddr, service_id: &str, service_type: &str) -> ClientConfig {
    ClientConfig::new(addr.to_string(), service_id, service_type)
}

#[tokio::test]
async fn connect_registers_and_reports_connected() {
    let running = spawn_broker(test_config()).await;
    let client = Client::connect(
        client_config(running.frontend, "C1", "Client").with_capabilities(vec!["observe".into()]),
    )
    .await
    .unwrap();

    assert!(client.is_connected());
    assert_eq!(running.broker.service_count().await, 1);
    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn connect_times_out_without_an_acknowledgment() {
    // A listener that accepts and then stays silent.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            sockets.push(socket);
        }
    });

    let err = Client::connect(
        client_config(addr, "C1", "Client").with_connect_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::ConnectTimeout(_)), "got: {err}");
}

#[tokio::test]
async fn request_resolves_with_the_response_not_the_ack() {
    let running = spawn_broker(test_config()).await;
    let service = Client::connect(client_config(running.backend, "S1", "Deck")).await.unwrap();
    let client = Client::connect(client_config(running.frontend, "C1", "Client")).await.unwrap();

    // Service application: answer every Request with a Response.
    let mut inbox = service.subscribe();
    tokio::spawn(async move {
        while let Ok(message) = inbox.recv().await {
            if message.kind == MessageKind::Request {
                service.respond(&message, r#"{"cards":3}"#).await.unwrap();
            }
        }
    });

    let response = client
        .request("S1", MessageKind::Request, r#"{"deal":3}"#, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.kind, MessageKind::Response);
    assert_eq!(response.sender_id, "S1");
    assert_eq!(response.payload, r#"{"cards":3}"#);

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn request_to_a_mute_service_times_out_despite_the_ack() {
    let running = spawn_broker(test_config()).await;
    // Registers and auto-acks, but its application never responds.
    let _mute = Client::connect(client_config(running.backend, "S1", "Deck")).await.unwrap();
    let client = Client::connect(client_config(running.frontend, "C1", "Client")).await.unwrap();

    let err = client
        .request("S1", MessageKind::Request, "", Duration::from_millis(400))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout), "got: {err}");

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn request_to_an_unknown_service_resolves_with_the_error_reply() {
    let running = spawn_broker(test_config()).await;
    let client = Client::connect(client_config(running.frontend, "C1", "Client")).await.unwrap();

    let reply = client
        .request("ghost", MessageKind::Request, "", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply.kind, MessageKind::Error);
    let payload: relay_protocol::ErrorPayload = reply.payload_as().unwrap();
    assert_eq!(payload.error_code, 404);
    assert_eq!(payload.message, "Unknown service: ghost");

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_registrations_populate_the_peer_cache() {
    let running = spawn_broker(test_config()).await;
    let observer = Client::connect(client_config(running.frontend, "C1", "Client")).await.unwrap();
    let _late = Client::connect(client_config(running.backend, "S9", "Deck")).await.unwrap();

    let mut found = false;
    for _ in 0..100 {
        if observer.known_peers().iter().any(|r| r.service_id == "S9") {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found, "observer must learn about S9 from the broadcast");

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn broker_shutdown_fails_pending_requests_and_flips_the_watch() {
    let running = spawn_broker(test_config()).await;
    let _mute = Client::connect(client_config(running.backend, "S1", "Deck")).await.unwrap();
    let client = Client::connect(client_config(running.frontend, "C1", "Client")).await.unwrap();
    let mut connection = client.connection_watch();

    let in_flight = tokio::spawn(async move {
        client
            .request("S1", MessageKind::Request, "", Duration::from_secs(30))
            .await
    });
    // Let the request reach the broker before tearing it down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    running.broker.shutdown().await.unwrap();

    let result = in_flight.await.unwrap();
    assert!(
        matches!(result, Err(ClientError::ConnectionLost)),
        "got: {result:?}"
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while *connection.borrow() {
            if connection.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("connection watch must flip to disconnected");
    assert!(!*connection.borrow());
}
