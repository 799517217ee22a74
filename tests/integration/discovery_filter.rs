//! Service discovery: type is case-insensitive, capability is
//! case-sensitive, empty criteria match all.

use relay_protocol::{DiscoveryQuery, Message, MessageKind, ServiceRegistration};
use relay_test_utils::{TestPeer, registration, spawn_broker, test_config};
use std::time::Duration;

async fn discover(
    client: &mut TestPeer,
    id: &str,
    query: &DiscoveryQuery,
) -> Vec<ServiceRegistration> {
    let mut request = Message::new(MessageKind::ServiceDiscovery, "C1");
    request.id = id.to_owned();
    request.set_payload(query).unwrap();
    client.send(&request).await.unwrap();
    let response = client
        .recv_matching(Duration::from_secs(5), |m| m.in_response_to == id)
        .await
        .expect("discovery must be answered");
    assert_eq!(response.kind, MessageKind::Response);
    response.payload_as().unwrap()
}

#[tokio::test]
async fn discovery_returns_exactly_the_matching_services() {
    let running = spawn_broker(test_config()).await;
    let mut s1 = TestPeer::connect(running.backend).await.unwrap();
    let mut s2 = TestPeer::connect(running.backend).await.unwrap();
    s1.register(&registration("S1", "Deck", &["shuffle"])).await.unwrap();
    s2.register(&registration("S2", "Deck", &["deal"])).await.unwrap();

    let mut client = TestPeer::connect(running.frontend).await.unwrap();

    let matches = discover(
        &mut client,
        "m7",
        &DiscoveryQuery {
            service_type: Some("Deck".to_owned()),
            capability: Some("shuffle".to_owned()),
        },
    )
    .await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].service_id, "S1");

    running.broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn discovery_criteria_compose_and_default_to_match_all() {
    let running = spawn_broker(test_config()).await;
    let mut s1 = TestPeer::connect(running.backend).await.unwrap();
    let mut s2 = TestPeer::connect(running.backend).await.unwrap();
    let mut s3 = TestPeer::connect(running.backend).await.unwrap();
    s1.register(&registration("S1", "Deck", &["shuffle"])).await.unwrap();
    s2.register(&registration("S2", "deck", &["deal"])).await.unwrap();
    s3.register(&registration("S3", "Score", &["deal"])).await.unwrap();

    let mut client = TestPeer::connect(running.frontend).await.unwrap();

    // Type comparison is case-insensitive.
    let decks = discover(
        &mut client,
        "q-type",
        &DiscoveryQuery {
            service_type: Some("DECK".to_owned()),
            capability: None,
        },
    )
    .await;
    let ids: Vec<&str> = decks.iter().map(|r| r.service_id.as_str()).collect();
    assert_eq!(ids, vec!["S1", "S2"]);

    // Capability comparison is case-sensitive.
    let shufflers = discover(
        &mut client,
        "q-cap",
        &DiscoveryQuery {
            service_type: None,
            capability: Some("Shuffle".to_owned()),
        },
    )
    .await;
    assert!(shufflers.is_empty());

    // An empty query matches everything.
    let all = discover(&mut client, "q-all", &DiscoveryQuery::default()).await;
    assert_eq!(all.len(), 3);

    running.broker.shutdown().await.unwrap();
}
