//! Send services for the platform requests the middleware issues
//!
//! Every service publishes a [`RequestEnvelope`] on the endpoint's measures
//! topic and returns the generated application message id. The caller is
//! responsible for registering that id as waiting for acknowledgement.

use super::envelope::{RequestEnvelope, RequestMode};
use super::messages::{
    ListEndpointsParameters, MessageQueryParameters, OnboardingResponse,
    PublishNonTelemetryDataParameters, TechnicalMessageType,
};
use crate::observability::metrics::metrics;
use crate::transport::{MqttError, TransportClient};
use serde_json::json;
use tracing::debug;

async fn send(
    client: &dyn TransportClient,
    onboarding: &OnboardingResponse,
    envelope: RequestEnvelope,
) -> Result<String, MqttError> {
    let payload = serde_json::to_vec(&envelope).map_err(MqttError::SerializationError)?;
    let topic = &onboarding.connection_criteria.measures;

    debug!(
        "Sending '{}' with message id '{}' on '{}'.",
        envelope.technical_message_type, envelope.application_message_id, topic
    );
    client.publish(topic, payload).await?;
    metrics().message_published();

    Ok(envelope.application_message_id)
}

/// Query the headers of the messages in the feed
pub async fn send_message_header_query(
    client: &dyn TransportClient,
    onboarding: &OnboardingResponse,
    parameters: &MessageQueryParameters,
) -> Result<String, MqttError> {
    let envelope = RequestEnvelope::new(
        TechnicalMessageType::FeedHeaderQuery,
        RequestMode::Direct,
        json!(parameters),
    );
    send(client, onboarding, envelope).await
}

/// Query the messages in the feed
pub async fn send_message_query(
    client: &dyn TransportClient,
    onboarding: &OnboardingResponse,
    parameters: &MessageQueryParameters,
) -> Result<String, MqttError> {
    let envelope = RequestEnvelope::new(
        TechnicalMessageType::FeedMessageQuery,
        RequestMode::Direct,
        json!(parameters),
    );
    send(client, onboarding, envelope).await
}

/// List the endpoints that can be addressed
pub async fn send_list_endpoints(
    client: &dyn TransportClient,
    onboarding: &OnboardingResponse,
    parameters: &ListEndpointsParameters,
) -> Result<String, MqttError> {
    let envelope = RequestEnvelope::new(
        TechnicalMessageType::ListEndpoints,
        RequestMode::Direct,
        json!(parameters),
    );
    send(client, onboarding, envelope).await
}

/// Publish a non-telemetry content message
pub async fn publish_non_telemetry_data(
    client: &dyn TransportClient,
    onboarding: &OnboardingResponse,
    parameters: &PublishNonTelemetryDataParameters,
) -> Result<String, MqttError> {
    let mode = if parameters.recipients.is_empty() {
        RequestMode::Publish
    } else {
        RequestMode::PublishWithDirect
    };
    let envelope = RequestEnvelope::new(
        TechnicalMessageType::from_key(&parameters.content_message_type),
        mode,
        json!(parameters.base64_encoded_message_content),
    )
    .with_recipients(parameters.recipients.clone())
    .with_filename(parameters.filename.clone());
    send(client, onboarding, envelope).await
}
