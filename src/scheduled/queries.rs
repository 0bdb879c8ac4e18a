//! Jobs querying the platform for state it does not push

use super::ScheduledJob;
use crate::acknowledgement::{AcknowledgementEntry, AcknowledgementStore};
use crate::audit::{AuditLog, EndpointLogInformation};
use crate::endpoint::{Endpoint, EndpointRepository};
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::protocol::{
    services, ListEndpointsParameters, MessageQueryParameters, TechnicalMessageType,
};
use crate::transport::ClientProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, Instrument};

/// Which request a query job sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Headers of the feed over the trailing query window
    FeedHeaderQuery,
    /// Endpoints the endpoint can receive from
    ListEndpoints,
    /// Messages of the feed over the trailing query window
    FeedMessageQuery,
}

impl QueryKind {
    pub fn job_name(self) -> &'static str {
        match self {
            QueryKind::FeedHeaderQuery => "status_logging",
            QueryKind::ListEndpoints => "recipient_query",
            QueryKind::FeedMessageQuery => "fetching_and_confirming_existing_messages",
        }
    }

    pub fn technical_message_type(self) -> TechnicalMessageType {
        match self {
            QueryKind::FeedHeaderQuery => TechnicalMessageType::FeedHeaderQuery,
            QueryKind::ListEndpoints => TechnicalMessageType::ListEndpoints,
            QueryKind::FeedMessageQuery => TechnicalMessageType::FeedMessageQuery,
        }
    }

    fn audit_message(self) -> Option<&'static str> {
        match self {
            QueryKind::FeedMessageQuery => Some("Fetching and confirming existing messages."),
            _ => None,
        }
    }
}

/// Outcome of one query tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReport {
    /// External endpoint id and message id of every request sent
    pub sent: Vec<(String, String)>,
    /// External endpoint ids that could not be queried
    pub skipped: Vec<String>,
}

/// Sends one query per active endpoint and waits for the ACK through the store
pub struct EndpointQueryJob {
    kind: QueryKind,
    repository: Arc<dyn EndpointRepository>,
    clients: Arc<dyn ClientProvider>,
    acknowledgements: Arc<AcknowledgementStore>,
    audit: Arc<dyn AuditLog>,
}

impl EndpointQueryJob {
    pub fn new(
        kind: QueryKind,
        repository: Arc<dyn EndpointRepository>,
        clients: Arc<dyn ClientProvider>,
        acknowledgements: Arc<AcknowledgementStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            kind,
            repository,
            clients,
            acknowledgements,
            audit,
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Query every endpoint that is not deactivated
    ///
    /// An endpoint without a usable client is logged and skipped, the batch
    /// carries on with the next one.
    pub async fn query_all(&self) -> MiddlewareResult<QueryReport> {
        let endpoints = self.repository.find_all().await?;
        let mut report = QueryReport::default();

        for endpoint in endpoints.iter().filter(|endpoint| !endpoint.deactivated) {
            let span = crate::endpoint_span!(
                external_endpoint_id = %endpoint.external_endpoint_id,
                query = self.kind.job_name()
            );
            match self.query_endpoint(endpoint).instrument(span).await {
                Ok(message_id) => report
                    .sent
                    .push((endpoint.external_endpoint_id.clone(), message_id)),
                Err(e) => {
                    error!(
                        "Could not send {} for endpoint '{}': {}",
                        self.kind.technical_message_type(),
                        endpoint.external_endpoint_id,
                        e.log_message()
                    );
                    report.skipped.push(endpoint.external_endpoint_id.clone());
                }
            }
        }
        Ok(report)
    }

    async fn query_endpoint(&self, endpoint: &Endpoint) -> MiddlewareResult<String> {
        let onboarding = endpoint.as_onboarding_response()?;
        let client = self.clients.get(&onboarding).await.ok_or_else(|| {
            MiddlewareError::could_not_connect_mqtt_client(&onboarding.sensor_alternate_id)
        })?;

        let message_id = match self.kind {
            QueryKind::FeedHeaderQuery => {
                services::send_message_header_query(
                    client.as_ref(),
                    &onboarding,
                    &MessageQueryParameters::trailing_window(),
                )
                .await?
            }
            QueryKind::ListEndpoints => {
                services::send_list_endpoints(
                    client.as_ref(),
                    &onboarding,
                    &ListEndpointsParameters::default(),
                )
                .await?
            }
            QueryKind::FeedMessageQuery => {
                services::send_message_query(
                    client.as_ref(),
                    &onboarding,
                    &MessageQueryParameters::trailing_window(),
                )
                .await?
            }
        };

        debug!("Saving message with ID '{}' waiting for ACK.", message_id);
        self.acknowledgements.save(AcknowledgementEntry::new(
            &endpoint.agrirouter_endpoint_id,
            &message_id,
            self.kind.technical_message_type(),
        ));
        if let Some(message) = self.kind.audit_message() {
            self.audit.log(
                &EndpointLogInformation::new(
                    &endpoint.external_endpoint_id,
                    &endpoint.agrirouter_endpoint_id,
                ),
                message,
            );
        }
        Ok(message_id)
    }
}

#[async_trait]
impl ScheduledJob for EndpointQueryJob {
    fn name(&self) -> &'static str {
        self.kind.job_name()
    }

    async fn run(&self) -> MiddlewareResult<()> {
        let report = self.query_all().await?;
        debug!(
            "{} sent {} queries, skipped {} endpoints.",
            self.name(),
            report.sent.len(),
            report.skipped.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_their_message_types() {
        assert_eq!(
            QueryKind::FeedHeaderQuery.technical_message_type().key(),
            "dke:feed_header_query"
        );
        assert_eq!(
            QueryKind::ListEndpoints.technical_message_type().key(),
            "dke:list_endpoints"
        );
        assert_eq!(
            QueryKind::FeedMessageQuery.technical_message_type().key(),
            "dke:feed_message_query"
        );
    }

    #[test]
    fn test_job_names_match_configuration_keys() {
        let schedule = crate::config::ScheduledSection::default();
        let keys: Vec<&str> = schedule.expressions().iter().map(|(key, _)| *key).collect();
        for kind in [
            QueryKind::FeedHeaderQuery,
            QueryKind::ListEndpoints,
            QueryKind::FeedMessageQuery,
        ] {
            assert!(keys.contains(&kind.job_name()));
        }
    }
}
