//! Mock implementations for testing
//!
//! Transport, client provider, audit log and platform status doubles so the
//! supervisor, the jobs and the publish path run without a broker.

use crate::audit::{AuditLog, EndpointLogInformation};
use crate::endpoint::Endpoint;
use crate::protocol::OnboardingResponse;
use crate::scheduled::PlatformStatus;
use crate::transport::{ClientProvider, ConnectionStatus, MqttError, TransportClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>);

/// Onboarding response JSON for an MQTT endpoint whose client id is `client_id`
pub fn onboard_json(client_id: &str) -> String {
    format!(
        r#"{{
            "sensorAlternateId": "sensor-{client_id}",
            "capabilityAlternateId": "capability-{client_id}",
            "deviceAlternateId": "device-{client_id}",
            "connectionCriteria": {{
                "gatewayId": "2",
                "host": "localhost",
                "port": "1883",
                "clientId": "{client_id}",
                "measures": "measures/{client_id}",
                "commands": "commands/{client_id}"
            }},
            "authentication": {{"type": "PEM", "secret": "", "certificate": ""}}
        }}"#
    )
}

pub fn onboarding(client_id: &str) -> OnboardingResponse {
    serde_json::from_str(&onboard_json(client_id)).expect("fixture onboarding is valid")
}

/// Endpoint whose own client id equals its external endpoint id
pub fn endpoint(external_endpoint_id: &str, agrirouter_endpoint_id: &str) -> Endpoint {
    Endpoint {
        external_endpoint_id: external_endpoint_id.to_string(),
        agrirouter_endpoint_id: agrirouter_endpoint_id.to_string(),
        onboard_response: onboard_json(external_endpoint_id),
        onboard_response_for_router_device: None,
        deactivated: false,
        message_recipients: Vec::new(),
        warnings: Vec::new(),
        errors: Vec::new(),
    }
}

/// Endpoint connected through the shared router device client `router_client_id`
pub fn router_device_endpoint(
    external_endpoint_id: &str,
    agrirouter_endpoint_id: &str,
    router_client_id: &str,
) -> Endpoint {
    Endpoint {
        onboard_response_for_router_device: Some(onboard_json(router_client_id)),
        ..endpoint(external_endpoint_id, agrirouter_endpoint_id)
    }
}

/// Mock transport client recording every operation in call order
#[derive(Debug)]
pub struct MockTransportClient {
    client_id: String,
    connected: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    operations: Mutex<Vec<String>>,
    published_messages: Mutex<Vec<PublishedMessage>>,
}

impl MockTransportClient {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            connected: AtomicBool::new(true),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            operations: Mutex::new(Vec::new()),
            published_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected(client_id: &str) -> Self {
        let client = Self::new(client_id);
        client.set_connected(false);
        client
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Relaxed);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Relaxed);
    }

    /// `subscribe:<topic>`, `unsubscribe:<topic>`, `publish:<topic>` and `disconnect`
    pub async fn get_operations(&self) -> Vec<String> {
        self.operations.lock().await.clone()
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.operations.lock().await.clear();
        self.published_messages.lock().await.clear();
    }

    async fn record(&self, operation: String) {
        self.operations.lock().await.push(operation);
    }
}

#[async_trait]
impl TransportClient for MockTransportClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record(format!("subscribe:{topic}")).await;
        if self.fail_subscribe.load(Ordering::Relaxed) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock subscribe failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record(format!("unsubscribe:{topic}")).await;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.record(format!("publish:{topic}")).await;
        if self.fail_publish.load(Ordering::Relaxed) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock publish failure".to_string(),
            ));
        }
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.record("disconnect".to_string()).await;
        self.set_connected(false);
        Ok(())
    }
}

/// Mock client provider handing out registered clients by connection client id
#[derive(Debug, Default)]
pub struct MockClientProvider {
    clients: Mutex<HashMap<String, Arc<MockTransportClient>>>,
    get_calls: Mutex<Vec<String>>,
    disconnected: Mutex<Vec<String>>,
}

impl MockClientProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<MockTransportClient>) -> Self {
        self.clients
            .get_mut()
            .insert(client.client_id().to_string(), client);
        self
    }

    pub async fn register(&self, client: Arc<MockTransportClient>) {
        self.clients
            .lock()
            .await
            .insert(client.client_id().to_string(), client);
    }

    /// Client ids `get` was asked for, in call order
    pub async fn get_calls(&self) -> Vec<String> {
        self.get_calls.lock().await.clone()
    }

    /// Client ids `disconnect` was called for, in call order
    pub async fn disconnected(&self) -> Vec<String> {
        self.disconnected.lock().await.clone()
    }
}

#[async_trait]
impl ClientProvider for MockClientProvider {
    async fn get(&self, onboarding: &OnboardingResponse) -> Option<Arc<dyn TransportClient>> {
        let client_id = &onboarding.connection_criteria.client_id;
        self.get_calls.lock().await.push(client_id.clone());
        self.clients
            .lock()
            .await
            .get(client_id)
            .map(|client| client.clone() as Arc<dyn TransportClient>)
    }

    async fn disconnect(&self, onboarding: &OnboardingResponse) {
        let client_id = &onboarding.connection_criteria.client_id;
        self.disconnected.lock().await.push(client_id.clone());
        if let Some(client) = self.clients.lock().await.get(client_id) {
            client.set_connected(false);
        }
    }

    async fn connection_state(&self, onboarding: &OnboardingResponse) -> ConnectionStatus {
        let client_id = &onboarding.connection_criteria.client_id;
        match self.clients.lock().await.get(client_id) {
            Some(client) => ConnectionStatus {
                client_id: client_id.clone(),
                cached: true,
                connected: client.is_connected(),
                subscribed: client.is_connected(),
                connection_errors: Vec::new(),
            },
            None => ConnectionStatus::not_cached(client_id),
        }
    }
}

/// Audit log keeping every line in memory
#[derive(Debug, Default)]
pub struct RecordingAuditLog {
    entries: std::sync::Mutex<Vec<(EndpointLogInformation, String)>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(EndpointLogInformation, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged for one external endpoint id
    pub fn messages_for(&self, external_endpoint_id: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(endpoint, _)| endpoint.external_endpoint_id == external_endpoint_id)
            .map(|(_, message)| message)
            .collect()
    }
}

impl AuditLog for RecordingAuditLog {
    fn log(&self, endpoint: &EndpointLogInformation, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((endpoint.clone(), message.to_string()));
        }
    }
}

/// Platform status that reports whatever the test sets
#[derive(Debug)]
pub struct StaticPlatformStatus {
    operational: AtomicBool,
}

impl StaticPlatformStatus {
    pub fn operational() -> Self {
        Self {
            operational: AtomicBool::new(true),
        }
    }

    pub fn down() -> Self {
        Self {
            operational: AtomicBool::new(false),
        }
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Relaxed);
    }
}

#[async_trait]
impl PlatformStatus for StaticPlatformStatus {
    async fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Relaxed)
    }
}
