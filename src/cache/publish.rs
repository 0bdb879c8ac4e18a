//! Publishing of non-telemetry content with cache fallback

use super::MessageCache;
use crate::acknowledgement::{AcknowledgementEntry, AcknowledgementStore};
use crate::audit::{AuditLog, EndpointLogInformation};
use crate::endpoint::{EndpointRepository, MessageRecipient};
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::protocol::{services, PublishNonTelemetryDataParameters, TechnicalMessageType};
use crate::transport::ClientProvider;
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { message_id: String },
    /// No usable connection, the message went back into the cache
    Cached,
}

pub struct PublishNonTelemetryDataService {
    repository: Arc<dyn EndpointRepository>,
    clients: Arc<dyn ClientProvider>,
    acknowledgements: Arc<AcknowledgementStore>,
    cache: Arc<dyn MessageCache>,
    audit: Arc<dyn AuditLog>,
}

impl PublishNonTelemetryDataService {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        clients: Arc<dyn ClientProvider>,
        acknowledgements: Arc<AcknowledgementStore>,
        cache: Arc<dyn MessageCache>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            repository,
            clients,
            acknowledgements,
            cache,
            audit,
        }
    }

    /// Publish now if the endpoint is connected, otherwise park the message
    ///
    /// Content that is not valid base64 is rejected and never cached.
    pub async fn publish(
        &self,
        mut parameters: PublishNonTelemetryDataParameters,
    ) -> MiddlewareResult<PublishOutcome> {
        validate_content(&parameters.base64_encoded_message_content)?;
        let external_endpoint_id = parameters.external_endpoint_id.clone();
        let log_information = EndpointLogInformation::external_only(&external_endpoint_id);

        let endpoint = self
            .repository
            .find_by_external_endpoint_id(&external_endpoint_id)
            .await?
            .ok_or_else(|| MiddlewareError::endpoint_not_found(&external_endpoint_id))?;
        if !parameters.recipients.is_empty() {
            parameters.recipients = resolve_recipients(
                &external_endpoint_id,
                &parameters.recipients,
                &endpoint.message_recipients,
            );
        }

        let client = if endpoint.deactivated {
            None
        } else {
            let onboarding = endpoint.as_onboarding_response()?;
            self.clients
                .get(&onboarding)
                .await
                .filter(|client| client.is_connected())
                .map(|client| (client, onboarding))
        };

        let Some((client, onboarding)) = client else {
            warn!("Could not publish data. No connection to the platform.");
            info!("Endpoint id: {}", external_endpoint_id);
            return self.put_back(&log_information, parameters);
        };

        let content_type = TechnicalMessageType::from_key(&parameters.content_message_type);
        match services::publish_non_telemetry_data(client.as_ref(), &onboarding, &parameters).await {
            Ok(message_id) => {
                self.acknowledgements.save(AcknowledgementEntry::new(
                    &endpoint.agrirouter_endpoint_id,
                    &message_id,
                    content_type,
                ));
                self.audit
                    .log(&log_information, "Non telemetry data published");
                Ok(PublishOutcome::Published { message_id })
            }
            Err(e) => {
                debug!("Could not publish data: {}", e);
                self.put_back(&log_information, parameters)
            }
        }
    }

    fn put_back(
        &self,
        log_information: &EndpointLogInformation,
        parameters: PublishNonTelemetryDataParameters,
    ) -> MiddlewareResult<PublishOutcome> {
        let external_endpoint_id = parameters.external_endpoint_id.clone();
        self.cache.put(&external_endpoint_id, parameters)?;
        self.audit.log(
            log_information,
            "Non telemetry data not published. Message saved to cache.",
        );
        Ok(PublishOutcome::Cached)
    }
}

fn validate_content(base64_encoded_message_content: &str) -> MiddlewareResult<()> {
    general_purpose::STANDARD
        .decode(base64_encoded_message_content)
        .map(|_| ())
        .map_err(|e| {
            debug!("Could not decode base64 encoded message content.");
            MiddlewareError::invalid_message_content(e.to_string())
        })
}

/// Map every requested recipient to its platform endpoint id, dropping unknown ones
fn resolve_recipients(
    external_endpoint_id: &str,
    requested: &[String],
    known: &[MessageRecipient],
) -> Vec<String> {
    let resolved: Vec<String> = requested
        .iter()
        .filter_map(|recipient| {
            match known.iter().find(|candidate| candidate.is_addressed_by(recipient)) {
                Some(candidate) => Some(candidate.agrirouter_endpoint_id.clone()),
                None => {
                    warn!(
                        "Recipient {} does not exist for endpoint {}.",
                        recipient, external_endpoint_id
                    );
                    None
                }
            }
        })
        .collect();
    debug!(
        "Recipients for endpoint {}: {:?} resolved to {:?}",
        external_endpoint_id, requested, resolved
    );
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ListEndpointsDirection;

    fn recipient(agrirouter_endpoint_id: &str, external_id: &str) -> MessageRecipient {
        MessageRecipient {
            agrirouter_endpoint_id: agrirouter_endpoint_id.to_string(),
            endpoint_name: String::new(),
            endpoint_type: String::new(),
            external_id: external_id.to_string(),
            technical_message_type: "iso:11783:-10:taskdata:zip".to_string(),
            direction: ListEndpointsDirection::Receive,
        }
    }

    #[test]
    fn test_recipients_resolve_by_either_id() {
        let known = vec![recipient("ar-2", "urn:2"), recipient("ar-3", "urn:3")];
        let requested = vec!["urn:2".to_string(), "ar-3".to_string(), "urn:9".to_string()];

        assert_eq!(resolve_recipients("x", &requested, &known), vec!["ar-2", "ar-3"]);
        assert!(resolve_recipients("x", &requested, &[]).is_empty());
    }

    #[test]
    fn test_content_must_be_base64() {
        assert!(validate_content("AAAA").is_ok());
        assert!(validate_content("").is_ok());
        assert!(matches!(
            validate_content("not base64!"),
            Err(MiddlewareError::InvalidMessageContent { .. })
        ));
    }
}
