//! Resolution of inbound acknowledgements against the store

use super::failures::{DEFAULT_FAILURE_MESSAGE, UNKNOWN_ERROR};
use super::{AcknowledgementEntry, AcknowledgementStore, CloudOnboardingFailureCache};
use crate::endpoint::{EndpointService, MessageRecipient};
use crate::error::MiddlewareResult;
use crate::observability::metrics::metrics;
use crate::protocol::{
    DynamicMessageProperties, ListEndpointsResponse, ResponseEnvelope, ResponseType,
    TechnicalMessageType,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The device description was valid but had no recipients
const NO_RECIPIENTS: &str = "VAL_000004";
/// The endpoint to offboard does not exist on the platform anymore
const ENDPOINT_DOES_NOT_EXIST: &str = "VAL_000011";

/// An acknowledgement decoded from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgementEvent {
    pub envelope: ResponseEnvelope,
}

impl AcknowledgementEvent {
    pub fn new(envelope: ResponseEnvelope) -> Self {
        Self { envelope }
    }

    pub fn message_id(&self) -> &str {
        &self.envelope.application_message_id
    }
}

/// Work triggered by a resolved acknowledgement, handled outside the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUpEvent {
    /// Capabilities were accepted, subscriptions can be sent
    UpdateSubscriptions { agrirouter_endpoint_id: String },
    /// Device description accepted, the device can be activated
    ActivateDevice { team_set_context_id: Option<String> },
    /// Virtual endpoints were removed on the platform
    CloudOffboarding { external_virtual_endpoint_ids: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgementOutcome {
    /// No entry was waiting for the message id
    Unknown,
    Success,
    SuccessWithMessages,
    Failure,
}

/// Correlates acknowledgements with the entries waiting for them
pub struct AcknowledgementHandler {
    store: Arc<AcknowledgementStore>,
    endpoints: EndpointService,
    follow_ups: mpsc::Sender<FollowUpEvent>,
    cloud_onboarding_failures: Arc<CloudOnboardingFailureCache>,
}

impl AcknowledgementHandler {
    pub fn new(
        store: Arc<AcknowledgementStore>,
        endpoints: EndpointService,
        follow_ups: mpsc::Sender<FollowUpEvent>,
    ) -> Self {
        Self {
            store,
            endpoints,
            follow_ups,
            cloud_onboarding_failures: Arc::new(CloudOnboardingFailureCache::new()),
        }
    }

    /// Share the failure cache with the status view
    pub fn with_cloud_onboarding_failures(mut self, failures: Arc<CloudOnboardingFailureCache>) -> Self {
        self.cloud_onboarding_failures = failures;
        self
    }

    /// Consume acknowledgement events until every sender is gone
    pub async fn run(self, mut events: mpsc::Receiver<AcknowledgementEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                error!("Could not handle acknowledgement: {}", e.log_message());
            }
        }
        debug!("Acknowledgement channel closed.");
    }

    pub async fn handle(&self, event: AcknowledgementEvent) -> MiddlewareResult<AcknowledgementOutcome> {
        let Some(entry) = self.store.find_by_message_id(event.message_id()) else {
            error!(
                "Could not find a message waiting for ACK with message id '{}'.",
                event.message_id()
            );
            return Ok(AcknowledgementOutcome::Unknown);
        };

        let envelope = &event.envelope;
        self.store
            .set_response(&entry.message_id, serde_json::to_string(envelope)?);
        metrics().acknowledgement_received();

        let outcome = match envelope.response_type {
            ResponseType::AckWithMessages => {
                if envelope.response_code >= 400 {
                    for message in &envelope.messages {
                        warn!(
                            "Message '{}' for endpoint '{}' was accepted with warning {}: {}",
                            entry.message_id,
                            entry.agrirouter_endpoint_id,
                            message.message_code,
                            message.message
                        );
                    }
                    if let Err(e) = self
                        .endpoints
                        .update_warnings(&entry.agrirouter_endpoint_id, envelope)
                        .await
                    {
                        error!("Could not record the warning: {}", e.log_message());
                    }
                }
                self.emit_success_follow_ups(&entry, false).await;
                AcknowledgementOutcome::SuccessWithMessages
            }
            ResponseType::AckWithFailure => {
                self.handle_failure(&entry, envelope).await;
                AcknowledgementOutcome::Failure
            }
            ResponseType::EndpointsListing => {
                self.update_message_recipients(&entry, envelope).await;
                AcknowledgementOutcome::Success
            }
            _ => {
                debug!(
                    "Message '{}' for endpoint '{}' had a successful ACK.",
                    entry.message_id, entry.agrirouter_endpoint_id
                );
                self.emit_success_follow_ups(&entry, true).await;
                AcknowledgementOutcome::Success
            }
        };

        self.store.delete(&entry);
        Ok(outcome)
    }

    async fn emit_success_follow_ups(&self, entry: &AcknowledgementEntry, include_offboarding: bool) {
        match &entry.technical_message_type {
            TechnicalMessageType::Capabilities => {
                self.emit(FollowUpEvent::UpdateSubscriptions {
                    agrirouter_endpoint_id: entry.agrirouter_endpoint_id.clone(),
                })
                .await
            }
            TechnicalMessageType::DeviceDescription => self.emit(activate_device(entry)).await,
            TechnicalMessageType::CloudOffboardEndpoints if include_offboarding => {
                self.emit(FollowUpEvent::CloudOffboarding {
                    external_virtual_endpoint_ids: entry
                        .dynamic_property_as_string_list(
                            DynamicMessageProperties::EXTERNAL_VIRTUAL_ENDPOINT_IDS,
                        )
                        .unwrap_or_default(),
                })
                .await
            }
            _ => {}
        }
    }

    async fn update_message_recipients(&self, entry: &AcknowledgementEntry, envelope: &ResponseEnvelope) {
        let listing = match ListEndpointsResponse::from_payload(&envelope.payload) {
            Ok(listing) => listing,
            Err(e) => {
                warn!(
                    "Could not decode the endpoint listing for endpoint '{}': {}",
                    entry.agrirouter_endpoint_id, e
                );
                return;
            }
        };
        let recipients = MessageRecipient::from_listing(&listing);
        if let Err(e) = self
            .endpoints
            .update_message_recipients(&entry.agrirouter_endpoint_id, recipients)
            .await
        {
            warn!("Could not update the recipients: {}", e.log_message());
        }
    }

    async fn handle_failure(&self, entry: &AcknowledgementEntry, envelope: &ResponseEnvelope) {
        for message in &envelope.messages {
            error!(
                "Message '{}' for endpoint '{}' failed with {}: {}",
                entry.message_id, entry.agrirouter_endpoint_id, message.message_code, message.message
            );
        }
        match self
            .endpoints
            .update_errors(&entry.agrirouter_endpoint_id, envelope)
            .await
        {
            Ok(endpoint) => {
                if entry.technical_message_type == TechnicalMessageType::CloudOnboardEndpoints {
                    self.remember_cloud_onboarding_failure(
                        entry,
                        envelope,
                        &endpoint.external_endpoint_id,
                    );
                }
            }
            Err(e) => error!("Could not record the error: {}", e.log_message()),
        }

        let Some(first) = envelope.messages.first() else {
            return;
        };
        match (&entry.technical_message_type, first.message_code.as_str()) {
            (TechnicalMessageType::DeviceDescription, NO_RECIPIENTS) => {
                debug!("Device description had no recipients but was valid, activating.");
                self.emit(activate_device(entry)).await;
            }
            (TechnicalMessageType::CloudOffboardEndpoints, ENDPOINT_DOES_NOT_EXIST) => {
                warn!("Cloud offboarding for an endpoint that no longer exists on the platform.");
                match first.args.get("endpointId") {
                    Some(agrirouter_endpoint_id) => {
                        if let Err(e) = self
                            .endpoints
                            .delete_endpoint_data(agrirouter_endpoint_id)
                            .await
                        {
                            debug!(
                                "Could not delete endpoint '{}': {}",
                                agrirouter_endpoint_id,
                                e.log_message()
                            );
                        }
                    }
                    None => warn!("The failure carries no endpoint id, nothing to delete."),
                }
            }
            _ => {}
        }
    }

    fn remember_cloud_onboarding_failure(
        &self,
        entry: &AcknowledgementEntry,
        envelope: &ResponseEnvelope,
        external_endpoint_id: &str,
    ) {
        let virtual_endpoint_id = entry
            .dynamic_property_as_string(DynamicMessageProperties::EXTERNAL_VIRTUAL_ENDPOINT_ID)
            .filter(|id| !id.trim().is_empty());
        let Some(virtual_endpoint_id) = virtual_endpoint_id else {
            error!("The external virtual endpoint id of a failed cloud onboarding is blank.");
            return;
        };
        let (error_code, error_message) = envelope
            .messages
            .first()
            .map(|m| (m.message_code.as_str(), m.message.as_str()))
            .unwrap_or((UNKNOWN_ERROR, DEFAULT_FAILURE_MESSAGE));
        self.cloud_onboarding_failures.put(
            external_endpoint_id,
            virtual_endpoint_id,
            error_code,
            error_message,
        );
    }

    async fn emit(&self, event: FollowUpEvent) {
        info!("Follow-up triggered: {:?}", event);
        if self.follow_ups.send(event).await.is_err() {
            warn!("Follow-up receiver is gone, dropping event.");
        }
    }
}

fn activate_device(entry: &AcknowledgementEntry) -> FollowUpEvent {
    FollowUpEvent::ActivateDevice {
        team_set_context_id: entry
            .dynamic_property_as_string(DynamicMessageProperties::TEAM_SET_CONTEXT_ID)
            .map(str::to_string),
    }
}
