use super::*;
use serde_json::Map;

#[tokio::test]
async fn operations_require_a_connection() {
    let broker = LoopbackBroker::new();
    assert!(matches!(
        broker.get_shadow().await,
        Err(BrokerError::NotConnected)
    ));
    assert!(matches!(
        broker.publish("t", Vec::new()).await,
        Err(BrokerError::NotConnected)
    ));
}

#[tokio::test]
async fn missing_shadow_is_rejected_and_update_makes_it_accepted() {
    let broker = LoopbackBroker::new();
    broker.connect().await.expect("connect");

    let first = broker.get_shadow().await.expect("get");
    assert_eq!(first.status, ShadowStatus::Rejected);

    let reported = ShadowState::new("clock", Map::new());
    broker
        .update_shadow(&ShadowDocument::reported(reported.clone()))
        .await
        .expect("update");

    let second = broker.get_shadow().await.expect("get");
    assert_eq!(second.status, ShadowStatus::Accepted);
    let document: ShadowDocument = serde_json::from_value(second.payload).expect("document");
    assert_eq!(document.state.reported, reported);
}

#[tokio::test]
async fn publish_fans_out_to_topic_subscribers_only() {
    let broker = LoopbackBroker::new();
    broker.connect().await.expect("connect");
    let mut input = broker.subscribe("display/a/input").await.expect("subscribe");

    broker
        .publish("display/b/input", b"{}".to_vec())
        .await
        .expect("publish b");
    broker
        .publish("display/a/input", b"{\"stage\":\"text\"}".to_vec())
        .await
        .expect("publish a");

    let message = input.recv().await.expect("message");
    assert_eq!(message.topic, "display/a/input");
    assert!(input.try_recv().is_err());
    assert_eq!(broker.published().len(), 2);
}

#[tokio::test]
async fn desired_changes_arrive_as_delta_messages() {
    let broker = LoopbackBroker::new();
    let mut deltas = broker.subscribe_deltas();

    broker
        .set_desired(ShadowDelta::stage("metrics"))
        .expect("desired");

    let message = deltas.recv().await.expect("delta");
    assert_eq!(message, json!({ "state": { "stage": "metrics" } }));
}

#[tokio::test]
async fn disconnect_closes_subscriptions() {
    let broker = LoopbackBroker::new();
    broker.connect().await.expect("connect");
    let mut input = broker.subscribe("x").await.expect("subscribe");

    broker.disconnect().await.expect("disconnect");

    assert!(matches!(
        input.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
    assert!(!broker.is_connected());
}

#[tokio::test]
async fn publish_and_update_logs_keep_only_the_newest_entries() {
    let broker = LoopbackBroker::new();
    broker.connect().await.expect("connect");

    for n in 0..RECORD_LIMIT + 10 {
        broker
            .publish("display/producers/metrics", n.to_string().into_bytes())
            .await
            .expect("publish");
        broker
            .update_shadow(&ShadowDocument::reported(ShadowState::new(
                n.to_string(),
                Map::new(),
            )))
            .await
            .expect("update");
    }

    let published = broker.published();
    assert_eq!(published.len(), RECORD_LIMIT);
    assert_eq!(published[0].payload, b"10".to_vec());
    assert_eq!(
        published[RECORD_LIMIT - 1].payload,
        (RECORD_LIMIT + 9).to_string().into_bytes()
    );

    let updates = broker.shadow_updates();
    assert_eq!(updates.len(), RECORD_LIMIT);
    assert_eq!(updates[0].state.reported.stage.as_deref(), Some("10"));
}
