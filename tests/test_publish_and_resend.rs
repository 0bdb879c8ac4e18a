//! Publishing with cache fallback and the re-send loop


use agrirouter_middleware::cache::{
    resend_channel, MessageCache, PublishNonTelemetryDataService, PublishOutcome, ResendConsumer,
    TransientMessageCache,
};
use agrirouter_middleware::endpoint::{
    Endpoint, EndpointRepository, InMemoryEndpointRepository, MessageRecipient,
};
use agrirouter_middleware::error::MiddlewareError;
use agrirouter_middleware::protocol::{
    ListEndpointsDirection, RequestEnvelope, RequestMode, TechnicalMessageType,
};
use agrirouter_middleware::testing::endpoint;
use std::sync::Arc;
use test_helpers::{parameters, TestHarness};

fn publisher(harness: &TestHarness, cache: Arc<TransientMessageCache>) -> Arc<PublishNonTelemetryDataService> {
    Arc::new(PublishNonTelemetryDataService::new(
        harness.repository.clone(),
        harness.clients.clone(),
        harness.acknowledgements.clone(),
        cache,
        harness.audit.clone(),
    ))
}

fn with_recipient(mut endpoint: Endpoint, agrirouter_endpoint_id: &str, external_id: &str) -> Endpoint {
    endpoint.message_recipients.push(MessageRecipient {
        agrirouter_endpoint_id: agrirouter_endpoint_id.to_string(),
        endpoint_name: "Recipient".to_string(),
        endpoint_type: "application".to_string(),
        external_id: external_id.to_string(),
        technical_message_type: "iso:11783:-10:taskdata:zip".to_string(),
        direction: ListEndpointsDirection::Receive,
    });
    endpoint
}

#[tokio::test]
async fn test_connected_endpoint_publishes_immediately() {
    let harness = TestHarness::new(vec![with_recipient(
        endpoint("x", "ar-x"),
        "ar-recipient",
        "urn:recipient",
    )]);
    let client = harness.connected_client("x").await;
    let (sender, _receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));

    let mut message = parameters("x", "AAAA");
    message.recipients = vec!["urn:recipient".to_string()];
    let outcome = publisher(&harness, cache.clone())
        .publish(message)
        .await
        .unwrap();

    let PublishOutcome::Published { message_id } = outcome else {
        panic!("Expected the message to be published");
    };
    let entry = harness.acknowledgements.find_by_message_id(&message_id).unwrap();
    assert_eq!(
        entry.technical_message_type,
        TechnicalMessageType::Content("iso:11783:-10:taskdata:zip".to_string())
    );
    assert!(cache.is_empty());

    let published = client.get_published_messages().await;
    let envelope: RequestEnvelope = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(envelope.mode, RequestMode::PublishWithDirect);
    assert_eq!(envelope.recipients, vec!["ar-recipient"]);
    assert_eq!(envelope.filename.as_deref(), Some("task.zip"));
    assert_eq!(harness.audit.messages_for("x"), vec!["Non telemetry data published"]);
}

#[tokio::test]
async fn test_unknown_recipients_are_dropped() {
    let harness = TestHarness::new(vec![with_recipient(
        endpoint("x", "ar-x"),
        "ar-known",
        "urn:known",
    )]);
    let client = harness.connected_client("x").await;
    let (sender, _receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));

    let mut message = parameters("x", "AAAA");
    message.recipients = vec!["urn:unknown".to_string(), "ar-known".to_string()];
    publisher(&harness, cache).publish(message).await.unwrap();

    let mut only_unknown = parameters("x", "AAAA");
    only_unknown.recipients = vec!["urn:unknown".to_string()];
    publisher(&harness, Arc::new(TransientMessageCache::new(3600, resend_channel(1).0)))
        .publish(only_unknown)
        .await
        .unwrap();

    let published = client.get_published_messages().await;
    let first: RequestEnvelope = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(first.recipients, vec!["ar-known"]);
    assert_eq!(first.mode, RequestMode::PublishWithDirect);
    let second: RequestEnvelope = serde_json::from_slice(&published[1].1).unwrap();
    assert!(second.recipients.is_empty());
    assert_eq!(second.mode, RequestMode::Publish);
}

#[tokio::test]
async fn test_content_that_is_not_base64_is_rejected() {
    let harness = TestHarness::new(vec![endpoint("x", "ar-x")]);
    let client = harness.connected_client("x").await;
    let (sender, _receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));

    let result = publisher(&harness, cache.clone())
        .publish(parameters("x", "%%% not base64 %%%"))
        .await;

    assert!(matches!(
        result,
        Err(MiddlewareError::InvalidMessageContent { .. })
    ));
    assert!(cache.is_empty());
    assert!(client.get_published_messages().await.is_empty());
    assert!(harness.acknowledgements.is_empty());
}

#[tokio::test]
async fn test_failed_publish_parks_the_message() {
    let harness = TestHarness::new(vec![endpoint("x", "ar-x")]);
    let client = harness.connected_client("x").await;
    client.fail_publish(true);
    let (sender, _receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));

    let outcome = publisher(&harness, cache.clone())
        .publish(parameters("x", "AAAA"))
        .await
        .unwrap();

    assert_eq!(outcome, PublishOutcome::Cached);
    assert_eq!(cache.count_current_message_cache_entries("x").unwrap(), 1);
    assert!(harness.acknowledgements.is_empty());
}

#[tokio::test]
async fn test_cached_message_is_delivered_once_the_endpoint_reconnects() {
    let harness = TestHarness::new(vec![endpoint("x", "ar-x")]);
    let (sender, mut receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));
    let publisher = publisher(&harness, cache.clone());

    assert_eq!(
        publisher.publish(parameters("x", "AAAA")).await.unwrap(),
        PublishOutcome::Cached
    );

    let client = harness.connected_client("x").await;
    assert_eq!(cache.send_messages().unwrap(), 1);
    let event = receiver.recv().await.unwrap();

    let outcome = ResendConsumer::new(publisher).handle(event).await;

    assert!(matches!(outcome, Some(PublishOutcome::Published { .. })));
    assert_eq!(client.get_published_messages().await.len(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_resend_failure_goes_back_into_the_cache() {
    let harness = TestHarness::new(vec![endpoint("x", "ar-x")]);
    let (sender, mut receiver) = resend_channel(8);
    let cache = Arc::new(TransientMessageCache::new(3600, sender));
    let publisher = publisher(&harness, cache.clone());
    cache.put("x", parameters("x", "AAAA")).unwrap();

    cache.send_messages().unwrap();
    let event = receiver.recv().await.unwrap();
    let outcome = ResendConsumer::new(publisher).handle(event).await;

    assert_eq!(outcome, Some(PublishOutcome::Cached));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_endpoints_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("endpoints.json");

    let repository = InMemoryEndpointRepository::load_from_file(&path).await.unwrap();
    assert!(repository.find_all().await.unwrap().is_empty());
    let mut stored: Endpoint = endpoint("x", "ar-x");
    stored.deactivated = true;
    repository.save(&stored).await.unwrap();

    let reloaded = InMemoryEndpointRepository::load_from_file(&path).await.unwrap();
    let found = reloaded
        .find_by_agrirouter_endpoint_id("ar-x")
        .await
        .unwrap()
        .unwrap();
    assert!(found.deactivated);
    assert_eq!(found, stored);
}
