//! Impure I/O operations for a single platform MQTT client
//!
//! Each client owns a rumqttc event loop task. The task reports the
//! connection state through a watch channel and forwards inbound publishes
//! to the [`InboundRouter`]. When the connection drops the task stops; the
//! manager builds a fresh client the next time the endpoint asks for one.

use super::connection::{ConnectionState, MqttError};
use super::message_handler::{EventRoute, InboundRouter, MessageHandler};
use crate::observability::metrics::metrics;
use crate::transport::TransportClient;
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT client for one onboarding identity
pub struct RumqttTransportClient {
    client_id: String,
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttTransportClient {
    /// Create the client and wait for the broker's ConnAck
    pub async fn connect(
        mqtt_options: MqttOptions,
        router: InboundRouter,
        connection_timeout: Duration,
    ) -> Result<Self, MqttError> {
        let client_id = mqtt_options.client_id();
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Self::run_event_loop(
            client_id.clone(),
            event_loop,
            state_tx.clone(),
            shutdown_rx,
            router,
        ));

        let transport = Self {
            client_id,
            client,
            state_rx: state_rx.clone(),
            state_tx,
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
        };

        Self::wait_for_connection_confirmation(state_rx, connection_timeout).await?;
        metrics().client_connected();
        Ok(transport)
    }

    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        router: InboundRouter,
    ) {
        info!("Starting MQTT event loop for client: {}", client_id);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Shutdown signal received for client: {}", client_id);
                        break;
                    }
                }
                event_result = event_loop.poll() => {
                    let event = match event_result {
                        Ok(event) => event,
                        Err(e) => {
                            error!("MQTT event loop error for client {}: {}", client_id, e);
                            metrics().connection_lost();
                            let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                            break;
                        }
                    };

                    match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            let _ = state_tx.send(ConnectionState::Connected);
                        }
                        EventRoute::ConnectionRefused(reason) => {
                            let _ = state_tx.send(ConnectionState::Disconnected(format!(
                                "Connection refused: {reason}"
                            )));
                            break;
                        }
                        EventRoute::MessageReceived { topic, payload } => {
                            router.route(&topic, &payload).await;
                        }
                        EventRoute::Disconnected => {
                            metrics().connection_lost();
                            let _ = state_tx.send(ConnectionState::Disconnected(
                                "Disconnected by broker".to_string(),
                            ));
                            break;
                        }
                        EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                            if failed {
                                warn!("Subscription {} of client {} was rejected.", packet_id, client_id);
                            } else {
                                debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                            }
                        }
                        EventRoute::InfrastructureEvent(event) => {
                            debug!(target: "mqtt_transport", "MQTT event: {}", event);
                        }
                        EventRoute::OutgoingEvent => {}
                    }
                }
            }
        }
        info!("MQTT event loop stopped for client: {}", client_id);
    }

    /// Wait for the ConnAck with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason))
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            state => Err(MqttError::NotConnected { state }),
        }
    }
}

#[async_trait]
impl TransportClient for RumqttTransportClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        debug!("Client {} subscribed to {}", self.client_id, topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        debug!("Client {} unsubscribed from {}", self.client_id, topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.check_connection_state()?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        let _ = self.shutdown_tx.send(true);
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)));
        let _ = self.state_tx.send(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e)
                }
                Err(_) => warn!("Event loop task didn't shut down gracefully"),
                _ => {}
            }
        }

        metrics().client_disconnected();
        info!("MQTT client {} disconnected", self.client_id);
        result
    }
}

impl Drop for RumqttTransportClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_connection_confirmation() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let waiter = tokio::spawn(RumqttTransportClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_secs(5),
        ));
        state_tx.send(ConnectionState::Connected).unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_reports_refusal() {
        let (_state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("refused".to_string()));
        let result = RumqttTransportClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(MqttError::ConnectionFailedStr(reason)) if reason == "refused"));
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let result = RumqttTransportClient::wait_for_connection_confirmation(
            state_rx,
            Duration::from_millis(50),
        )
        .await;
        assert!(result.is_err());
    }
}
