//! Periodic connection check for every known endpoint

use super::ScheduledJob;
use crate::audit::{AuditLog, EndpointLogInformation};
use crate::endpoint::{Endpoint, EndpointRepository};
use crate::error::MiddlewareResult;
use crate::observability::metrics::metrics;
use crate::protocol::OnboardingResponse;
use crate::transport::ClientProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

/// Who owns the transport client an endpoint talks through
///
/// Resolved once per endpoint and tick. Only a dedicated client may be torn
/// down by the supervisor, a router device client is shared by every endpoint
/// of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOwnership {
    Dedicated,
    SharedRouterDevice,
}

impl ClientOwnership {
    pub fn of(endpoint: &Endpoint) -> Self {
        if endpoint.uses_router_device() {
            ClientOwnership::SharedRouterDevice
        } else {
            ClientOwnership::Dedicated
        }
    }

    pub fn may_disconnect(self) -> bool {
        matches!(self, ClientOwnership::Dedicated)
    }
}

/// Outcome of checking a single endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCheckResult {
    /// Client connected and resubscribed to the commands topic
    Connected,
    NoClientAvailable,
    NotConnected,
    Failed(String),
}

impl ConnectionCheckResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionCheckResult::Connected)
    }
}

/// Per-endpoint results of one tick, in repository order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionCheckReport {
    pub results: Vec<(String, ConnectionCheckResult)>,
}

impl ConnectionCheckReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn result_for(&self, external_endpoint_id: &str) -> Option<&ConnectionCheckResult> {
        self.results
            .iter()
            .find(|(id, _)| id == external_endpoint_id)
            .map(|(_, result)| result)
    }
}

/// Keeps the endpoints' connections and `deactivated` flags in line with reality
pub struct ConnectionSupervisor {
    repository: Arc<dyn EndpointRepository>,
    clients: Arc<dyn ClientProvider>,
    audit: Arc<dyn AuditLog>,
}

impl ConnectionSupervisor {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        clients: Arc<dyn ClientProvider>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            repository,
            clients,
            audit,
        }
    }

    /// Check every endpoint, deactivated or not
    ///
    /// Only a failing repository read fails the tick. Everything that goes
    /// wrong for a single endpoint ends up in its result.
    pub async fn check_connections(&self) -> MiddlewareResult<ConnectionCheckReport> {
        let endpoints = self.repository.find_all().await?;
        debug!("Scheduled connection check for {} endpoints.", endpoints.len());

        let mut report = ConnectionCheckReport::default();
        for mut endpoint in endpoints {
            let span = crate::endpoint_span!(external_endpoint_id = %endpoint.external_endpoint_id);
            let result = self.check_endpoint(&mut endpoint).instrument(span).await;
            report
                .results
                .push((endpoint.external_endpoint_id.clone(), result));
        }
        Ok(report)
    }

    /// Run the check for one endpoint and persist the resulting flag
    pub async fn check_endpoint(&self, endpoint: &mut Endpoint) -> ConnectionCheckResult {
        endpoint.deactivated = false;
        let ownership = ClientOwnership::of(endpoint);

        let (result, onboarding) = match endpoint.as_onboarding_response() {
            Ok(onboarding) => (self.verify(&onboarding).await, Some(onboarding)),
            Err(e) => (ConnectionCheckResult::Failed(e.log_message()), None),
        };

        let log_information = EndpointLogInformation::new(
            &endpoint.external_endpoint_id,
            &endpoint.agrirouter_endpoint_id,
        );
        if result.is_success() {
            metrics().connection_check_succeeded();
            debug!(
                "Scheduled connection check for endpoint '{}' was successful.",
                endpoint.external_endpoint_id
            );
        } else {
            metrics().connection_check_failed();
            endpoint.deactivated = true;
            warn!(
                "Scheduled connection check for endpoint '{}' has FAILED: {:?}",
                endpoint.external_endpoint_id, result
            );
            match (&onboarding, ownership.may_disconnect()) {
                (Some(onboarding), true) => self.clients.disconnect(onboarding).await,
                (_, false) => debug!("Leaving the shared router device client connected."),
                (None, true) => {}
            }
        }

        if let Err(e) = self.repository.save(endpoint).await {
            error!(
                "Could not save the connection state of endpoint '{}': {}",
                endpoint.external_endpoint_id,
                e.log_message()
            );
        }

        let message = if result.is_success() {
            "Scheduled connection check was successful."
        } else {
            "Scheduled connection check has failed, endpoint deactivated."
        };
        self.audit.log(&log_information, message);
        result
    }

    async fn verify(&self, onboarding: &OnboardingResponse) -> ConnectionCheckResult {
        let Some(client) = self.clients.get(onboarding).await else {
            return ConnectionCheckResult::NoClientAvailable;
        };
        if !client.is_connected() {
            return ConnectionCheckResult::NotConnected;
        }

        let topic = &onboarding.connection_criteria.commands;
        if let Err(e) = client.unsubscribe(topic).await {
            return ConnectionCheckResult::Failed(format!("Unsubscribe from '{topic}' failed: {e}"));
        }
        match client.subscribe(topic).await {
            Ok(()) => ConnectionCheckResult::Connected,
            Err(e) => ConnectionCheckResult::Failed(format!("Subscribe to '{topic}' failed: {e}")),
        }
    }
}

#[async_trait]
impl ScheduledJob for ConnectionSupervisor {
    fn name(&self) -> &'static str {
        "connection_check"
    }

    async fn run(&self) -> MiddlewareResult<()> {
        let report = self.check_connections().await?;
        debug!(
            "Connection check done, {} succeeded and {} failed.",
            report.succeeded(),
            report.failed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{endpoint, router_device_endpoint};

    #[test]
    fn test_ownership_resolution() {
        let own = endpoint("ext-1", "ar-1");
        assert_eq!(ClientOwnership::of(&own), ClientOwnership::Dedicated);
        assert!(ClientOwnership::of(&own).may_disconnect());

        let shared = router_device_endpoint("ext-2", "ar-2", "router");
        assert_eq!(
            ClientOwnership::of(&shared),
            ClientOwnership::SharedRouterDevice
        );
        assert!(!ClientOwnership::of(&shared).may_disconnect());
    }

    #[test]
    fn test_report_counts() {
        let report = ConnectionCheckReport {
            results: vec![
                ("a".to_string(), ConnectionCheckResult::Connected),
                ("b".to_string(), ConnectionCheckResult::NotConnected),
                ("c".to_string(), ConnectionCheckResult::Failed("x".to_string())),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(
            report.result_for("b"),
            Some(&ConnectionCheckResult::NotConnected)
        );
        assert_eq!(report.result_for("z"), None);
    }
}
