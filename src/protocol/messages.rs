//! Platform message types, onboarding identity and request parameters

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway id the platform assigns to MQTT onboardings
pub const MQTT_GATEWAY_ID: &str = "2";

/// Window queried by the header and message query jobs
pub const QUERY_WINDOW_DAYS: i64 = 28;

/// Technical message types the middleware sends or waits on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TechnicalMessageType {
    FeedHeaderQuery,
    ListEndpoints,
    FeedMessageQuery,
    FeedConfirm,
    Capabilities,
    CloudOnboardEndpoints,
    CloudOffboardEndpoints,
    DeviceDescription,
    /// Any content message type, e.g. `iso:11783:-10:taskdata:zip`
    Content(String),
}

impl TechnicalMessageType {
    pub fn key(&self) -> &str {
        match self {
            TechnicalMessageType::FeedHeaderQuery => "dke:feed_header_query",
            TechnicalMessageType::ListEndpoints => "dke:list_endpoints",
            TechnicalMessageType::FeedMessageQuery => "dke:feed_message_query",
            TechnicalMessageType::FeedConfirm => "dke:feed_confirm",
            TechnicalMessageType::Capabilities => "dke:capabilities",
            TechnicalMessageType::CloudOnboardEndpoints => "dke:cloud_onboard_endpoints",
            TechnicalMessageType::CloudOffboardEndpoints => "dke:cloud_offboard_endpoints",
            TechnicalMessageType::DeviceDescription => {
                "iso:11783:-10:device_description:protobuf"
            }
            TechnicalMessageType::Content(key) => key,
        }
    }

    pub fn from_key(key: &str) -> Self {
        match key {
            "dke:feed_header_query" => TechnicalMessageType::FeedHeaderQuery,
            "dke:list_endpoints" => TechnicalMessageType::ListEndpoints,
            "dke:feed_message_query" => TechnicalMessageType::FeedMessageQuery,
            "dke:feed_confirm" => TechnicalMessageType::FeedConfirm,
            "dke:capabilities" => TechnicalMessageType::Capabilities,
            "dke:cloud_onboard_endpoints" => TechnicalMessageType::CloudOnboardEndpoints,
            "dke:cloud_offboard_endpoints" => TechnicalMessageType::CloudOffboardEndpoints,
            "iso:11783:-10:device_description:protobuf" => TechnicalMessageType::DeviceDescription,
            other => TechnicalMessageType::Content(other.to_string()),
        }
    }
}

impl fmt::Display for TechnicalMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl From<TechnicalMessageType> for String {
    fn from(value: TechnicalMessageType) -> Self {
        value.key().to_string()
    }
}

impl From<String> for TechnicalMessageType {
    fn from(value: String) -> Self {
        TechnicalMessageType::from_key(&value)
    }
}

/// Keys of the dynamic properties carried by acknowledgement entries
pub struct DynamicMessageProperties;

impl DynamicMessageProperties {
    pub const TEAM_SET_CONTEXT_ID: &'static str = "team_set_context_id";
    pub const EXTERNAL_VIRTUAL_ENDPOINT_ID: &'static str = "EXTERNAL_VIRTUAL_ENDPOINT_ID";
    pub const EXTERNAL_VIRTUAL_ENDPOINT_IDS: &'static str = "EXTERNAL_VIRTUAL_ENDPOINT_IDS";
}

/// Connection bundle returned by the platform on onboarding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub sensor_alternate_id: String,
    #[serde(default)]
    pub capability_alternate_id: String,
    #[serde(default)]
    pub device_alternate_id: String,
    pub connection_criteria: ConnectionCriteria,
    #[serde(default)]
    pub authentication: Authentication,
}

impl OnboardingResponse {
    pub fn is_mqtt(&self) -> bool {
        self.connection_criteria.gateway_id == MQTT_GATEWAY_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCriteria {
    pub gateway_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub client_id: String,
    /// Topic the endpoint publishes on
    #[serde(default)]
    pub measures: String,
    /// Topic the platform answers on
    #[serde(default)]
    pub commands: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub certificate: String,
}

/// Parameters of a header or message query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQueryParameters {
    pub sent_from_in_seconds: i64,
    pub sent_to_in_seconds: i64,
}

impl MessageQueryParameters {
    /// The trailing query window ending now
    pub fn trailing_window() -> Self {
        let now = Utc::now();
        Self {
            sent_from_in_seconds: (now - ChronoDuration::days(QUERY_WINDOW_DAYS)).timestamp(),
            sent_to_in_seconds: now.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListEndpointsDirection {
    Send,
    Receive,
    SendReceive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEndpointsParameters {
    pub direction: ListEndpointsDirection,
    /// Empty means all message types
    pub technical_message_type: String,
    pub unfiltered_list: bool,
}

impl Default for ListEndpointsParameters {
    fn default() -> Self {
        Self {
            direction: ListEndpointsDirection::Receive,
            technical_message_type: String::new(),
            unfiltered_list: false,
        }
    }
}

/// Payload of an `ENDPOINTS_LISTING` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListEndpointsResponse {
    #[serde(default)]
    pub endpoints: Vec<ListedEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedEndpoint {
    pub endpoint_id: String,
    #[serde(default)]
    pub endpoint_name: String,
    #[serde(default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub message_types: Vec<ListedMessageType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedMessageType {
    pub technical_message_type: String,
    pub direction: ListEndpointsDirection,
}

impl ListEndpointsResponse {
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(payload)
    }
}

/// Payload of a non-telemetry message, also what the message cache holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishNonTelemetryDataParameters {
    pub external_endpoint_id: String,
    pub base64_encoded_message_content: String,
    pub content_message_type: String,
    pub filename: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}
