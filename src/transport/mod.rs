//! Transport layer towards the platform broker
//!
//! The scheduled jobs and services never construct clients themselves. They
//! ask a [`ClientProvider`] for the client belonging to an onboarding and talk
//! to it through the [`TransportClient`] trait, which keeps them testable
//! without a broker.

use crate::protocol::OnboardingResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub mod mqtt;

pub use mqtt::MqttError;

/// A live connection for one onboarding identity
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    /// Client id used towards the broker
    fn client_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;

    async fn disconnect(&self) -> Result<(), MqttError>;
}

/// Owner of the per-endpoint transport clients
#[async_trait::async_trait]
pub trait ClientProvider: Send + Sync {
    /// Connected client for the onboarding, creating one if needed
    async fn get(&self, onboarding: &OnboardingResponse) -> Option<Arc<dyn TransportClient>>;

    /// Disconnect and forget the client for the onboarding
    async fn disconnect(&self, onboarding: &OnboardingResponse);

    /// Connection state for status views, without connecting
    async fn connection_state(&self, onboarding: &OnboardingResponse) -> ConnectionStatus {
        ConnectionStatus::not_cached(&onboarding.connection_criteria.client_id)
    }
}

/// A connection failure remembered for a cached client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionError {
    pub point_in_time: DateTime<Utc>,
    pub error_message: String,
}

impl ConnectionError {
    pub fn now<S: Into<String>>(error_message: S) -> Self {
        Self {
            point_in_time: Utc::now(),
            error_message: error_message.into(),
        }
    }
}

/// Connection state of one onboarding as seen by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub client_id: String,
    pub cached: bool,
    pub connected: bool,
    pub subscribed: bool,
    pub connection_errors: Vec<ConnectionError>,
}

impl ConnectionStatus {
    pub fn not_cached(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            cached: false,
            connected: false,
            subscribed: false,
            connection_errors: Vec::new(),
        }
    }
}
