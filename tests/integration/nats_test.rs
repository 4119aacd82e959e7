//! Integration Tests for the NATS adapters
//!
//! These tests require:
//! - NATS server with JetStream enabled (`nats-server -js`)
//! - PUBSUB_URL pointing at it (defaults to nats://localhost:4222)

use pubsub_config::BusConfig;
use pubsub_wrapper::{
    adapt_client, handler, Client, ListPolicy, Message, NatsClient, OwnedMessage, PubSubError,
    SubscriptionConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn bus_config() -> BusConfig {
    BusConfig {
        url: std::env::var("PUBSUB_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
        ..Default::default()
    }
}

async fn connect() -> NatsClient {
    NatsClient::connect(&bus_config())
        .await
        .expect("Failed to connect to NATS")
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_topic_create_list_delete() {
    let client = connect().await;
    let topic_id = unique("topic");

    let topic = client.create_topic(&topic_id).await.expect("Failed to create topic");
    assert_eq!(topic.to_string(), topic_id);

    let listed: Vec<String> = client
        .topics()
        .await
        .expect("Failed to list topics")
        .iter()
        .map(|t| t.to_string())
        .collect();
    assert!(listed.contains(&topic_id));

    topic.delete().await.expect("Failed to delete topic");

    // Deleting again surfaces the server's own error
    let err = client.topic(&topic_id).delete().await.unwrap_err();
    assert!(matches!(err, PubSubError::Nats(_)));
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_create_existing_topic_with_other_subject_fails() {
    let client = connect().await;
    let topic_id = unique("topic");
    client.create_topic(&topic_id).await.unwrap();

    let other_prefix = NatsClient::new(
        async_nats::jetstream::new(async_nats::connect(bus_config().url).await.unwrap()),
        pubsub_wrapper::ClientOptions {
            subject_prefix: "elsewhere".to_string(),
            ..Default::default()
        },
    );
    let err = other_prefix.create_topic(&topic_id).await.unwrap_err();
    assert!(matches!(err, PubSubError::Nats(_)));

    client.topic(&topic_id).delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_publish_and_receive_round_trip() {
    let client = connect().await;
    let topic_id = unique("topic");
    let topic = client.create_topic(&topic_id).await.unwrap();
    let subscription = client
        .create_subscription(
            "audit",
            SubscriptionConfig::new(topic.clone()).with_label("suite", "integration"),
        )
        .await
        .expect("Failed to create subscription");
    assert_eq!(subscription.to_string(), format!("{topic_id}/audit"));
    assert!(subscription.exists().await.unwrap());

    let attributes = HashMap::from([("kind".to_string(), "invoice".to_string())]);
    let outgoing = OwnedMessage::new(b"\x00payload".to_vec()).with_attributes(attributes.clone());
    let result = topic.publish(&outgoing);
    let server_id = result.get().await.expect("Failed to publish");
    assert_eq!(result.get().await.unwrap(), server_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<dyn Message>>();
    let shutdown = CancellationToken::new();
    let receiving = {
        let subscription = subscription.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            subscription
                .receive(
                    shutdown,
                    handler(move |msg| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(msg);
                        }
                    }),
                )
                .await
        })
    };

    let received = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("No message delivered")
        .unwrap();
    assert_eq!(received.id(), server_id);
    assert_eq!(received.data(), outgoing.data());
    assert_eq!(received.attributes(), &attributes);
    assert!(received.publish_time().is_some());

    shutdown.cancel();
    receiving.await.unwrap().expect("Receive failed");

    let listed: Vec<String> = client
        .subscriptions()
        .await
        .unwrap()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert!(listed.contains(&subscription.to_string()));

    subscription.delete().await.unwrap();
    assert!(!subscription.exists().await.unwrap());
    topic.delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_adapted_context_lists_with_lenient_policy() {
    let nats = async_nats::connect(bus_config().url).await.unwrap();
    let client = adapt_client(async_nats::jetstream::new(nats));
    assert_eq!(client.options().list_policy, ListPolicy::Strict);

    let topic_id = unique("topic");
    client.create_topic(&topic_id).await.unwrap();

    let lenient = NatsClient::connect(&BusConfig {
        list_policy: ListPolicy::Lenient,
        ..bus_config()
    })
    .await
    .unwrap();
    let strict = client.topics().await.unwrap().len();
    let relaxed = lenient.topics().await.unwrap().len();
    assert_eq!(strict, relaxed);

    client.topic(&topic_id).delete().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_subscription_on_missing_topic_fails() {
    let client = connect().await;
    let missing = client.topic(&unique("missing"));

    let err = client
        .create_subscription("audit", SubscriptionConfig::new(missing))
        .await
        .unwrap_err();
    assert!(matches!(err, PubSubError::Nats(_)));
}
