//! JSON envelopes exchanged with the platform
//!
//! Outbound requests carry a fresh application message id; the platform
//! echoes that id in the response envelope, which is how acknowledgements
//! are correlated back to the acknowledgement store.

use super::messages::TechnicalMessageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static SEQUENCE_NUMBER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMode {
    Direct,
    Publish,
    PublishWithDirect,
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub application_message_id: String,
    pub application_message_seq_no: u64,
    pub technical_message_type: TechnicalMessageType,
    pub mode: RequestMode,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    pub fn new(
        technical_message_type: TechnicalMessageType,
        mode: RequestMode,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            application_message_id: Uuid::new_v4().to_string(),
            application_message_seq_no: SEQUENCE_NUMBER.fetch_add(1, Ordering::Relaxed),
            technical_message_type,
            mode,
            timestamp: Utc::now(),
            recipients: Vec::new(),
            filename: None,
            payload,
        }
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }
}

/// Kind of an inbound response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseType {
    Ack,
    AckWithMessages,
    AckWithFailure,
    AckForFeedMessage,
    AckForFeedHeaderList,
    CloudRegistrations,
    EndpointsListing,
    PushNotification,
}

impl ResponseType {
    /// Responses that resolve a pending acknowledgement
    ///
    /// An endpoint listing answers a `dke:list_endpoints` request and resolves
    /// it like any other acknowledgement.
    pub fn is_acknowledgement(&self) -> bool {
        !matches!(self, ResponseType::PushNotification)
    }
}

/// A single message attached to an acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessageEntry {
    pub message_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// Inbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub application_message_id: String,
    pub response_code: u16,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    #[serde(default)]
    pub messages: Vec<ResponseMessageEntry>,
    /// Typed details, e.g. the endpoints of a listing
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ResponseEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
