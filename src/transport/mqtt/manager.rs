//! Owner of every platform MQTT client in the process

use super::client::RumqttTransportClient;
use super::connection::configure_mqtt_options;
use super::message_handler::InboundRouter;
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::protocol::OnboardingResponse;
use crate::transport::{ClientProvider, ConnectionError, ConnectionStatus, TransportClient};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Topics each broker client id is known to be subscribed to
#[derive(Debug, Default)]
pub struct SubscriptionsForMqttClient {
    subscriptions: DashMap<String, HashSet<String>>,
}

impl SubscriptionsForMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, client_id: &str, topic: &str) {
        self.subscriptions
            .entry(client_id.to_string())
            .or_default()
            .insert(topic.to_string());
    }

    pub fn exists(&self, client_id: &str, topic: &str) -> bool {
        self.subscriptions
            .get(client_id)
            .is_some_and(|topics| topics.contains(topic))
    }

    pub fn clear(&self, client_id: &str) {
        self.subscriptions.remove(client_id);
    }
}

struct CachedMqttClient {
    sensor_alternate_id: String,
    client: Option<Arc<RumqttTransportClient>>,
    connection_errors: Vec<ConnectionError>,
}

impl CachedMqttClient {
    fn connected_client(&self) -> Option<Arc<RumqttTransportClient>> {
        self.client.clone().filter(|client| client.is_connected())
    }
}

/// Per-client row of the connection overview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MqttConnectionStatus {
    pub client_id: String,
    pub sensor_alternate_id: String,
    /// `CONNECTED`, `DISCONNECTED` or `EMPTY`
    pub connection_status: &'static str,
}

/// rumqttc backed [`ClientProvider`], keyed by connection client id
pub struct MqttClientManager {
    config: MqttSection,
    ca: Option<Vec<u8>>,
    router: InboundRouter,
    clients: Mutex<HashMap<String, CachedMqttClient>>,
    /// Serializes connection setup per client id
    creation_guards: DashMap<String, Arc<Mutex<()>>>,
    subscriptions: SubscriptionsForMqttClient,
}

impl MqttClientManager {
    pub fn new(config: MqttSection, ca: Option<Vec<u8>>, router: InboundRouter) -> Self {
        Self {
            config,
            ca,
            router,
            clients: Mutex::new(HashMap::new()),
            creation_guards: DashMap::new(),
            subscriptions: SubscriptionsForMqttClient::new(),
        }
    }

    /// Read the configured CA file, if any
    pub fn load_ca(config: &MqttSection) -> std::io::Result<Option<Vec<u8>>> {
        config.ca_file.as_ref().map(std::fs::read).transpose()
    }

    pub fn subscriptions(&self) -> &SubscriptionsForMqttClient {
        &self.subscriptions
    }

    fn creation_guard(&self, client_id: &str) -> Arc<Mutex<()>> {
        self.creation_guards
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    fn forget_creation_guard(&self, client_id: &str) {
        self.creation_guards
            .remove_if(client_id, |_, guard| Arc::strong_count(guard) == 1);
    }

    async fn create_client(
        &self,
        onboarding: &OnboardingResponse,
    ) -> Result<Arc<RumqttTransportClient>, String> {
        metrics().client_initialized();
        let options = configure_mqtt_options(onboarding, &self.config, self.ca.as_deref())
            .map_err(|e| e.to_string())?;
        let client = RumqttTransportClient::connect(
            options,
            self.router.clone(),
            Duration::from_secs(self.config.connection_timeout_secs),
        )
        .await
        .map_err(|e| e.to_string())?;
        Ok(Arc::new(client))
    }

    async fn subscribe_if_necessary(
        &self,
        onboarding: &OnboardingResponse,
        client: &RumqttTransportClient,
    ) {
        let topic = &onboarding.connection_criteria.commands;
        if self.subscriptions.exists(client.client_id(), topic) {
            debug!(
                "Already sent subscriptions for endpoint '{}', not sending again.",
                onboarding.sensor_alternate_id
            );
            return;
        }
        match client.subscribe(topic).await {
            Ok(()) => {
                self.subscriptions.add(client.client_id(), topic);
                debug!(
                    "Successfully subscribed to the commands for endpoint '{}'.",
                    onboarding.sensor_alternate_id
                );
            }
            Err(e) => error!(
                "Could not subscribe to the commands for endpoint '{}': {}",
                onboarding.sensor_alternate_id, e
            ),
        }
    }

    /// Forcibly disconnect a client and forget it and its subscriptions
    pub async fn kill(&self, client_id: &str) {
        let cached = self.clients.lock().await.remove(client_id);
        self.subscriptions.clear(client_id);
        self.forget_creation_guard(client_id);
        if let Some(client) = cached.and_then(|c| c.client) {
            warn!(
                "Disconnecting client '{}'. It reconnects when an endpoint asks for it.",
                client_id
            );
            if let Err(e) = client.disconnect().await {
                error!("Could not disconnect the MQTT client '{}': {}", client_id, e);
            }
        }
    }

    /// Kill every cached client that is no longer connected
    pub async fn remove_stale_connections(&self) -> usize {
        let stale: Vec<String> = self
            .clients
            .lock()
            .await
            .iter()
            .filter(|(_, cached)| cached.connected_client().is_none())
            .map(|(client_id, _)| client_id.clone())
            .collect();
        for client_id in &stale {
            self.kill(client_id).await;
        }
        if !stale.is_empty() {
            info!("Removed {} stale MQTT connections.", stale.len());
        }
        stale.len()
    }

    /// Disconnect every cached client, used on shutdown
    pub async fn disconnect_all(&self) {
        let client_ids: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        for client_id in &client_ids {
            self.kill(client_id).await;
        }
    }

    pub async fn number_of_active_connections(&self) -> usize {
        self.clients
            .lock()
            .await
            .values()
            .filter(|cached| cached.connected_client().is_some())
            .count()
    }

    pub async fn number_of_inactive_connections(&self) -> usize {
        self.clients
            .lock()
            .await
            .values()
            .filter(|cached| cached.connected_client().is_none())
            .count()
    }

    pub async fn mqtt_connection_status(&self) -> Vec<MqttConnectionStatus> {
        self.clients
            .lock()
            .await
            .iter()
            .map(|(client_id, cached)| MqttConnectionStatus {
                client_id: client_id.clone(),
                sensor_alternate_id: cached.sensor_alternate_id.clone(),
                connection_status: match &cached.client {
                    Some(client) if client.is_connected() => "CONNECTED",
                    Some(_) => "DISCONNECTED",
                    None => "EMPTY",
                },
            })
            .collect()
    }

    pub async fn clear_connection_errors(&self, onboarding: &OnboardingResponse) {
        if let Some(cached) = self
            .clients
            .lock()
            .await
            .get_mut(&onboarding.connection_criteria.client_id)
        {
            cached.connection_errors.clear();
        }
    }
}

#[async_trait]
impl ClientProvider for MqttClientManager {
    async fn get(&self, onboarding: &OnboardingResponse) -> Option<Arc<dyn TransportClient>> {
        if !onboarding.is_mqtt() {
            debug!(
                "This onboard response is not MQTT ready, the gateway is set to {}.",
                onboarding.connection_criteria.gateway_id
            );
            return None;
        }
        let client_id = &onboarding.connection_criteria.client_id;
        let guard = self.creation_guard(client_id);
        let _creating = guard.lock().await;

        let existing = {
            let mut clients = self.clients.lock().await;
            let cached = clients.entry(client_id.clone()).or_insert_with(|| {
                metrics().cache_miss();
                debug!("Did not find a mqtt client for '{}'. Creating a new one.", client_id);
                CachedMqttClient {
                    sensor_alternate_id: onboarding.sensor_alternate_id.clone(),
                    client: None,
                    connection_errors: Vec::new(),
                }
            });
            cached.connected_client()
        };

        let client = match existing {
            Some(client) => client,
            None => {
                debug!(
                    "The mqtt client for '{}' is not connected, reconnecting.",
                    client_id
                );
                self.subscriptions.clear(client_id);
                let created = self.create_client(onboarding).await;
                let mut clients = self.clients.lock().await;
                let cached = clients.entry(client_id.clone()).or_insert_with(|| CachedMqttClient {
                    sensor_alternate_id: onboarding.sensor_alternate_id.clone(),
                    client: None,
                    connection_errors: Vec::new(),
                });
                match created {
                    Ok(client) => {
                        let replaced = cached.client.replace(client.clone());
                        drop(clients);
                        if let Some(replaced) = replaced {
                            if let Err(e) = replaced.disconnect().await {
                                debug!("Could not disconnect the replaced client '{}': {}", client_id, e);
                            }
                        }
                        client
                    }
                    Err(message) => {
                        cached.client = None;
                        cached.connection_errors.push(ConnectionError::now(format!(
                            "There was an error while connecting the client, the error message was '{message}'."
                        )));
                        error!(
                            "Could not connect the MQTT client for endpoint '{}': {}",
                            onboarding.sensor_alternate_id, message
                        );
                        return None;
                    }
                }
            }
        };

        self.subscribe_if_necessary(onboarding, &client).await;
        Some(client as Arc<dyn TransportClient>)
    }

    async fn disconnect(&self, onboarding: &OnboardingResponse) {
        let client_id = &onboarding.connection_criteria.client_id;
        let cached = self.clients.lock().await.remove(client_id);
        self.subscriptions.clear(client_id);
        self.forget_creation_guard(client_id);
        if let Some(client) = cached.and_then(|c| c.client) {
            if let Err(e) = client.disconnect().await {
                error!("Could not disconnect the MQTT client: {}", e);
            }
        }
    }

    async fn connection_state(&self, onboarding: &OnboardingResponse) -> ConnectionStatus {
        let criteria = &onboarding.connection_criteria;
        let clients = self.clients.lock().await;
        match clients.get(&criteria.client_id) {
            Some(cached) => {
                let connected = cached
                    .client
                    .as_ref()
                    .is_some_and(|client| client.is_connected());
                ConnectionStatus {
                    client_id: criteria.client_id.clone(),
                    cached: true,
                    connected,
                    subscribed: connected
                        && self.subscriptions.exists(&criteria.client_id, &criteria.commands),
                    connection_errors: cached.connection_errors.clone(),
                }
            }
            None => ConnectionStatus::not_cached(&criteria.client_id),
        }
    }
}
