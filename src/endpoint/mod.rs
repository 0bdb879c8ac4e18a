//! Endpoints known to the middleware

use crate::error::{MiddlewareError, MiddlewareResult};
use crate::protocol::{
    ListEndpointsDirection, ListEndpointsResponse, OnboardingResponse, ResponseEnvelope,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub mod repository;
pub mod service;

pub use repository::{EndpointRepository, InMemoryEndpointRepository};
pub use service::EndpointService;

/// A registered communication identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub external_endpoint_id: String,
    pub agrirouter_endpoint_id: String,
    /// Onboarding response as returned by the platform (JSON)
    pub onboard_response: String,
    /// Onboarding response of the application's router device (JSON)
    #[serde(default)]
    pub onboard_response_for_router_device: Option<String>,
    #[serde(default)]
    pub deactivated: bool,
    /// Receivers found by the last endpoint listing
    #[serde(default)]
    pub message_recipients: Vec<MessageRecipient>,
    #[serde(default)]
    pub warnings: Vec<EndpointLogEntry>,
    #[serde(default)]
    pub errors: Vec<EndpointLogEntry>,
}

/// An endpoint that accepts a message type from this endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecipient {
    pub agrirouter_endpoint_id: String,
    pub endpoint_name: String,
    pub endpoint_type: String,
    pub external_id: String,
    pub technical_message_type: String,
    pub direction: ListEndpointsDirection,
}

impl MessageRecipient {
    /// Recipients of a listing, one per receivable message type
    pub fn from_listing(listing: &ListEndpointsResponse) -> Vec<Self> {
        listing
            .endpoints
            .iter()
            .flat_map(|endpoint| {
                endpoint
                    .message_types
                    .iter()
                    .filter(|message_type| message_type.direction == ListEndpointsDirection::Receive)
                    .map(move |message_type| Self {
                        agrirouter_endpoint_id: endpoint.endpoint_id.clone(),
                        endpoint_name: endpoint.endpoint_name.clone(),
                        endpoint_type: endpoint.endpoint_type.clone(),
                        external_id: endpoint.external_id.clone(),
                        technical_message_type: message_type.technical_message_type.clone(),
                        direction: message_type.direction,
                    })
            })
            .collect()
    }

    /// Matches on either the platform id or the external id
    pub fn is_addressed_by(&self, recipient: &str) -> bool {
        self.agrirouter_endpoint_id == recipient || self.external_id == recipient
    }
}

/// A warning or error the platform reported for one of the endpoint's messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointLogEntry {
    pub response_code: u16,
    pub response_type: String,
    pub message_id: String,
    pub timestamp: i64,
    /// `[<message code>] <message>` of the first attached message
    pub message: String,
}

impl EndpointLogEntry {
    pub fn from_response(envelope: &ResponseEnvelope) -> Self {
        let message = envelope
            .messages
            .first()
            .map(|m| format!("[{}] {}", m.message_code, m.message))
            .unwrap_or_default();
        Self {
            response_code: envelope.response_code,
            response_type: format!("{:?}", envelope.response_type),
            message_id: envelope.application_message_id.clone(),
            timestamp: Utc::now().timestamp(),
            message,
        }
    }
}

impl Endpoint {
    /// Onboarding used for the connection, preferring the router device
    pub fn as_onboarding_response(&self) -> MiddlewareResult<OnboardingResponse> {
        match self.router_device_onboard_response() {
            Some(json) => parse_onboard_response(json),
            None => self.as_original_onboarding_response(),
        }
    }

    /// Onboarding of the endpoint itself, ignoring any router device
    pub fn as_original_onboarding_response(&self) -> MiddlewareResult<OnboardingResponse> {
        parse_onboard_response(&self.onboard_response)
    }

    /// Endpoints behind a router device share the application's client
    pub fn uses_router_device(&self) -> bool {
        self.router_device_onboard_response().is_some()
    }

    fn router_device_onboard_response(&self) -> Option<&str> {
        self.onboard_response_for_router_device
            .as_deref()
            .filter(|json| !json.trim().is_empty())
    }
}

fn parse_onboard_response(json: &str) -> MiddlewareResult<OnboardingResponse> {
    serde_json::from_str(json)
        .map_err(|e| MiddlewareError::could_not_parse_onboard_response(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onboard_json(client_id: &str) -> String {
        format!(
            r#"{{"sensorAlternateId":"sensor-{client_id}","connectionCriteria":{{"gatewayId":"2","clientId":"{client_id}","commands":"commands/{client_id}"}}}}"#
        )
    }

    fn endpoint(router_device: Option<String>) -> Endpoint {
        Endpoint {
            external_endpoint_id: "ext-1".to_string(),
            agrirouter_endpoint_id: "ar-1".to_string(),
            onboard_response: onboard_json("own"),
            onboard_response_for_router_device: router_device,
            deactivated: false,
            message_recipients: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_router_device_onboarding_is_preferred() {
        let endpoint = endpoint(Some(onboard_json("router")));
        assert!(endpoint.uses_router_device());
        assert_eq!(
            endpoint
                .as_onboarding_response()
                .unwrap()
                .connection_criteria
                .client_id,
            "router"
        );
        assert_eq!(
            endpoint
                .as_original_onboarding_response()
                .unwrap()
                .connection_criteria
                .client_id,
            "own"
        );
    }

    #[test]
    fn test_blank_router_device_onboarding_is_ignored() {
        let endpoint = endpoint(Some("  ".to_string()));
        assert!(!endpoint.uses_router_device());
        assert_eq!(
            endpoint
                .as_onboarding_response()
                .unwrap()
                .connection_criteria
                .client_id,
            "own"
        );
    }

    #[test]
    fn test_only_receiving_message_types_become_recipients() {
        let listing: ListEndpointsResponse = serde_json::from_str(
            r#"{"endpoints": [
                {"endpoint_id": "ar-2", "external_id": "urn:2", "message_types": [
                    {"technical_message_type": "iso:11783:-10:taskdata:zip", "direction": "RECEIVE"},
                    {"technical_message_type": "img:png", "direction": "SEND"},
                    {"technical_message_type": "img:bmp", "direction": "SEND_RECEIVE"}
                ]},
                {"endpoint_id": "ar-3", "message_types": []}
            ]}"#,
        )
        .unwrap();

        let recipients = MessageRecipient::from_listing(&listing);

        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].technical_message_type, "iso:11783:-10:taskdata:zip");
        assert!(recipients[0].is_addressed_by("urn:2"));
        assert!(recipients[0].is_addressed_by("ar-2"));
        assert!(!recipients[0].is_addressed_by("ar-3"));
    }

    #[test]
    fn test_endpoints_stored_before_recipients_existed_still_load() {
        let json = format!(
            r#"{{"externalEndpointId":"ext-1","agrirouterEndpointId":"ar-1","onboardResponse":{}}}"#,
            serde_json::to_string(&onboard_json("own")).unwrap()
        );
        let endpoint: Endpoint = serde_json::from_str(&json).unwrap();
        assert!(endpoint.message_recipients.is_empty());
        assert!(endpoint.warnings.is_empty());
        assert!(endpoint.errors.is_empty());
    }

    #[test]
    fn test_broken_onboarding_is_a_business_error() {
        let mut endpoint = endpoint(None);
        endpoint.onboard_response = "{not json".to_string();
        assert!(matches!(
            endpoint.as_onboarding_response(),
            Err(MiddlewareError::CouldNotParseOnboardResponse { .. })
        ));
    }
}
