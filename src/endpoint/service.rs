//! Endpoint lifecycle operations

use super::{Endpoint, EndpointLogEntry, EndpointRepository, MessageRecipient};
use crate::acknowledgement::AcknowledgementStore;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::protocol::ResponseEnvelope;
use crate::transport::ClientProvider;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinates the data a single endpoint owns across the middleware
#[derive(Clone)]
pub struct EndpointService {
    repository: Arc<dyn EndpointRepository>,
    acknowledgements: Arc<AcknowledgementStore>,
    clients: Arc<dyn ClientProvider>,
}

impl EndpointService {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        acknowledgements: Arc<AcknowledgementStore>,
        clients: Arc<dyn ClientProvider>,
    ) -> Self {
        Self {
            repository,
            acknowledgements,
            clients,
        }
    }

    pub fn repository(&self) -> &Arc<dyn EndpointRepository> {
        &self.repository
    }

    /// Remove everything the middleware holds for an offboarded endpoint
    ///
    /// Returns `Ok(false)` if the endpoint is unknown. A shared router device
    /// client is left connected since other endpoints still use it.
    pub async fn delete_endpoint_data(&self, agrirouter_endpoint_id: &str) -> MiddlewareResult<bool> {
        let Some(endpoint) = self
            .repository
            .find_by_agrirouter_endpoint_id(agrirouter_endpoint_id)
            .await?
        else {
            warn!(
                "Endpoint '{}' not found, nothing to delete.",
                agrirouter_endpoint_id
            );
            return Ok(false);
        };

        let removed = self.acknowledgements.delete_all_for_endpoint(&endpoint);
        info!(
            "Removed {} messages waiting for ACK for endpoint '{}'.",
            removed, agrirouter_endpoint_id
        );

        self.disconnect(&endpoint).await;
        self.repository.delete(&endpoint.external_endpoint_id).await?;
        info!(
            target: "audit",
            external_endpoint_id = %endpoint.external_endpoint_id,
            "Endpoint data deleted."
        );
        Ok(true)
    }

    /// Replace the recipients with the result of the latest listing
    pub async fn update_message_recipients(
        &self,
        agrirouter_endpoint_id: &str,
        recipients: Vec<MessageRecipient>,
    ) -> MiddlewareResult<Endpoint> {
        let mut endpoint = self.find_by_agrirouter_endpoint_id(agrirouter_endpoint_id).await?;
        debug!(
            "There were {} recipients found for the endpoint '{}'.",
            recipients.len(),
            agrirouter_endpoint_id
        );
        endpoint.message_recipients = recipients;
        self.repository.save(&endpoint).await?;
        Ok(endpoint)
    }

    /// Record the first message of an ACK that carried warnings
    pub async fn update_warnings(
        &self,
        agrirouter_endpoint_id: &str,
        envelope: &ResponseEnvelope,
    ) -> MiddlewareResult<Endpoint> {
        let mut endpoint = self.find_by_agrirouter_endpoint_id(agrirouter_endpoint_id).await?;
        endpoint.warnings.push(EndpointLogEntry::from_response(envelope));
        self.repository.save(&endpoint).await?;
        info!(
            target: "audit",
            external_endpoint_id = %endpoint.external_endpoint_id,
            agrirouter_endpoint_id = %endpoint.agrirouter_endpoint_id,
            "Warning has been created."
        );
        Ok(endpoint)
    }

    /// Record the first message of a failed ACK
    pub async fn update_errors(
        &self,
        agrirouter_endpoint_id: &str,
        envelope: &ResponseEnvelope,
    ) -> MiddlewareResult<Endpoint> {
        let mut endpoint = self.find_by_agrirouter_endpoint_id(agrirouter_endpoint_id).await?;
        endpoint.errors.push(EndpointLogEntry::from_response(envelope));
        self.repository.save(&endpoint).await?;
        info!(
            target: "audit",
            external_endpoint_id = %endpoint.external_endpoint_id,
            agrirouter_endpoint_id = %endpoint.agrirouter_endpoint_id,
            "Error has been created."
        );
        Ok(endpoint)
    }

    pub async fn reset_warnings(&self, external_endpoint_id: &str) -> MiddlewareResult<bool> {
        self.reset(external_endpoint_id, |endpoint| endpoint.warnings.clear(), "Warnings were reset.")
            .await
    }

    pub async fn reset_errors(&self, external_endpoint_id: &str) -> MiddlewareResult<bool> {
        self.reset(external_endpoint_id, |endpoint| endpoint.errors.clear(), "Errors were reset.")
            .await
    }

    async fn reset(
        &self,
        external_endpoint_id: &str,
        clear: impl FnOnce(&mut Endpoint),
        audit_message: &str,
    ) -> MiddlewareResult<bool> {
        let Some(mut endpoint) = self
            .repository
            .find_by_external_endpoint_id(external_endpoint_id)
            .await?
        else {
            warn!(
                "Tried to reset endpoint '{}', but it was not found.",
                external_endpoint_id
            );
            return Ok(false);
        };
        clear(&mut endpoint);
        self.repository.save(&endpoint).await?;
        info!(
            target: "audit",
            external_endpoint_id = %endpoint.external_endpoint_id,
            "{}",
            audit_message
        );
        Ok(true)
    }

    async fn find_by_agrirouter_endpoint_id(&self, agrirouter_endpoint_id: &str) -> MiddlewareResult<Endpoint> {
        self.repository
            .find_by_agrirouter_endpoint_id(agrirouter_endpoint_id)
            .await?
            .ok_or_else(|| MiddlewareError::endpoint_not_found(agrirouter_endpoint_id))
    }

    async fn disconnect(&self, endpoint: &Endpoint) {
        if endpoint.uses_router_device() {
            return;
        }
        match endpoint.as_onboarding_response() {
            Ok(onboarding) => self.clients.disconnect(&onboarding).await,
            Err(e) => warn!(
                "Could not disconnect endpoint '{}': {}",
                endpoint.external_endpoint_id,
                e.log_message()
            ),
        }
    }
}
