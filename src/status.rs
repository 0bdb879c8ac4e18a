//! Read-only view on the state the middleware keeps per endpoint

use crate::acknowledgement::{
    AcknowledgementStore, CloudOnboardingFailure, CloudOnboardingFailureCache,
};
use crate::cache::MessageCache;
use crate::endpoint::{Endpoint, EndpointLogEntry, EndpointRepository};
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::transport::{ClientProvider, ConnectionStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Everything the status API reports for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatus {
    pub external_endpoint_id: String,
    pub agrirouter_endpoint_id: String,
    pub deactivated: bool,
    pub uses_router_device: bool,
    /// `None` if the onboarding response cannot be read
    pub connection: Option<ConnectionStatus>,
    pub messages_waiting_for_ack: usize,
    /// `None` if the cache backend cannot count
    pub message_cache_entries: Option<usize>,
    pub message_recipients: usize,
    pub warnings: Vec<EndpointLogEntry>,
    pub errors: Vec<EndpointLogEntry>,
    pub cloud_onboarding_failures: Vec<CloudOnboardingFailure>,
}

/// Totals over every endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub endpoints: usize,
    pub connected: usize,
    pub deactivated: usize,
    pub messages_waiting_for_ack: usize,
}

impl StatusSummary {
    pub fn from_statuses(statuses: &[EndpointStatus]) -> Self {
        Self {
            endpoints: statuses.len(),
            connected: statuses
                .iter()
                .filter(|s| s.connection.as_ref().is_some_and(|c| c.connected))
                .count(),
            deactivated: statuses.iter().filter(|s| s.deactivated).count(),
            messages_waiting_for_ack: statuses.iter().map(|s| s.messages_waiting_for_ack).sum(),
        }
    }
}

pub struct StatusService {
    repository: Arc<dyn EndpointRepository>,
    acknowledgements: Arc<AcknowledgementStore>,
    cache: Arc<dyn MessageCache>,
    clients: Arc<dyn ClientProvider>,
    cloud_onboarding_failures: Arc<CloudOnboardingFailureCache>,
}

impl StatusService {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        acknowledgements: Arc<AcknowledgementStore>,
        cache: Arc<dyn MessageCache>,
        clients: Arc<dyn ClientProvider>,
    ) -> Self {
        Self {
            repository,
            acknowledgements,
            cache,
            clients,
            cloud_onboarding_failures: Arc::new(CloudOnboardingFailureCache::new()),
        }
    }

    pub fn with_cloud_onboarding_failures(mut self, failures: Arc<CloudOnboardingFailureCache>) -> Self {
        self.cloud_onboarding_failures = failures;
        self
    }

    pub async fn endpoint_status(&self, external_endpoint_id: &str) -> MiddlewareResult<EndpointStatus> {
        let endpoint = self
            .repository
            .find_by_external_endpoint_id(external_endpoint_id)
            .await?
            .ok_or_else(|| MiddlewareError::endpoint_not_found(external_endpoint_id))?;
        Ok(self.status_of(&endpoint).await)
    }

    pub async fn all(&self) -> MiddlewareResult<Vec<EndpointStatus>> {
        let mut endpoints = self.repository.find_all().await?;
        endpoints.sort_by(|a, b| a.external_endpoint_id.cmp(&b.external_endpoint_id));

        let mut statuses = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            statuses.push(self.status_of(endpoint).await);
        }
        Ok(statuses)
    }

    async fn status_of(&self, endpoint: &Endpoint) -> EndpointStatus {
        let connection = match endpoint.as_onboarding_response() {
            Ok(onboarding) => Some(self.clients.connection_state(&onboarding).await),
            Err(e) => {
                debug!(
                    "No connection state for endpoint '{}': {}",
                    endpoint.external_endpoint_id,
                    e.log_message()
                );
                None
            }
        };

        EndpointStatus {
            external_endpoint_id: endpoint.external_endpoint_id.clone(),
            agrirouter_endpoint_id: endpoint.agrirouter_endpoint_id.clone(),
            deactivated: endpoint.deactivated,
            uses_router_device: endpoint.uses_router_device(),
            connection,
            messages_waiting_for_ack: self
                .acknowledgements
                .find_all_for_endpoint(&endpoint.agrirouter_endpoint_id)
                .len(),
            message_cache_entries: self
                .cache
                .count_current_message_cache_entries(&endpoint.external_endpoint_id)
                .ok(),
            message_recipients: endpoint.message_recipients.len(),
            warnings: endpoint.warnings.clone(),
            errors: endpoint.errors.clone(),
            cloud_onboarding_failures: self
                .cloud_onboarding_failures
                .get(&endpoint.external_endpoint_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acknowledgement::AcknowledgementEntry;
    use crate::cache::{resend_channel, PersistentMessageCache, TransientMessageCache};
    use crate::endpoint::InMemoryEndpointRepository;
    use crate::protocol::{PublishNonTelemetryDataParameters, TechnicalMessageType};
    use crate::testing::mocks::{endpoint, MockClientProvider, MockTransportClient};

    fn parameters(external_endpoint_id: &str) -> PublishNonTelemetryDataParameters {
        PublishNonTelemetryDataParameters {
            external_endpoint_id: external_endpoint_id.to_string(),
            base64_encoded_message_content: "AAAA".to_string(),
            content_message_type: "iso:11783:-10:taskdata:zip".to_string(),
            filename: None,
            recipients: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_endpoint_status_collects_every_source() {
        let mut deactivated = endpoint("ext-2", "ar-2");
        deactivated.deactivated = true;
        let repository = Arc::new(InMemoryEndpointRepository::with_endpoints(vec![
            endpoint("ext-1", "ar-1"),
            deactivated,
        ]));
        let store = Arc::new(AcknowledgementStore::default());
        store.save(AcknowledgementEntry::new("ar-1", "m1", TechnicalMessageType::FeedHeaderQuery));
        store.save(AcknowledgementEntry::new("ar-1", "m2", TechnicalMessageType::ListEndpoints));

        let (sender, _receiver) = resend_channel(4);
        let cache = Arc::new(TransientMessageCache::new(60, sender));
        cache.put("ext-1", parameters("ext-1")).unwrap();

        let clients = Arc::new(
            MockClientProvider::new().with_client(Arc::new(MockTransportClient::new("ext-1"))),
        );
        let service = StatusService::new(repository, store, cache, clients);

        let status = service.endpoint_status("ext-1").await.unwrap();
        assert!(!status.deactivated);
        assert!(status.connection.as_ref().unwrap().connected);
        assert_eq!(status.messages_waiting_for_ack, 2);
        assert_eq!(status.message_cache_entries, Some(1));

        let all = service.all().await.unwrap();
        let summary = StatusSummary::from_statuses(&all);
        assert_eq!(summary.endpoints, 2);
        assert_eq!(summary.connected, 1);
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.messages_waiting_for_ack, 2);
    }

    #[tokio::test]
    async fn test_uncountable_cache_and_unknown_endpoint() {
        let service = StatusService::new(
            Arc::new(InMemoryEndpointRepository::with_endpoints(vec![endpoint(
                "ext-1", "ar-1",
            )])),
            Arc::new(AcknowledgementStore::default()),
            Arc::new(PersistentMessageCache::new()),
            Arc::new(MockClientProvider::new()),
        );

        let status = service.endpoint_status("ext-1").await.unwrap();
        assert_eq!(status.message_cache_entries, None);
        assert!(!status.connection.unwrap().cached);

        assert!(matches!(
            service.endpoint_status("missing").await,
            Err(MiddlewareError::EndpointNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_warnings_errors_and_onboarding_failures_are_reported() {
        let mut troubled = endpoint("ext-1", "ar-1");
        let logged = EndpointLogEntry {
            response_code: 400,
            response_type: "AckWithFailure".to_string(),
            message_id: "MSG-1".to_string(),
            timestamp: 0,
            message: "[VAL_000022] rejected".to_string(),
        };
        troubled.errors.push(logged.clone());
        troubled.warnings.push(EndpointLogEntry {
            response_type: "AckWithMessages".to_string(),
            ..logged.clone()
        });
        let failures = Arc::new(CloudOnboardingFailureCache::new());
        failures.put("ext-1", "virtual-1", "VAL_000022", "rejected");
        failures.put("ext-other", "virtual-2", "VAL_000022", "rejected");

        let service = StatusService::new(
            Arc::new(InMemoryEndpointRepository::with_endpoints(vec![troubled])),
            Arc::new(AcknowledgementStore::default()),
            Arc::new(PersistentMessageCache::new()),
            Arc::new(MockClientProvider::new()),
        )
        .with_cloud_onboarding_failures(failures);

        let status = service.endpoint_status("ext-1").await.unwrap();
        assert_eq!(status.errors, vec![logged]);
        assert_eq!(status.warnings[0].response_type, "AckWithMessages");
        assert_eq!(status.message_recipients, 0);
        assert_eq!(status.cloud_onboarding_failures.len(), 1);
        assert_eq!(
            status.cloud_onboarding_failures[0].virtual_external_endpoint_id,
            "virtual-1"
        );
    }
}
