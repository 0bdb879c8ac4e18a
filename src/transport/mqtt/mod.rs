//! MQTT transport towards the platform broker
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure connection state and option building
//! - [`message_handler`] - Pure event routing and the inbound router
//! - [`client`] - The rumqttc client and its event loop task
//! - [`manager`] - Client cache implementing [`crate::transport::ClientProvider`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use agrirouter_middleware::config::MqttSection;
//! use agrirouter_middleware::testing::onboarding;
//! use agrirouter_middleware::transport::mqtt::{InboundRouter, MqttClientManager};
//! use agrirouter_middleware::transport::ClientProvider;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let (acknowledgements, _receiver) = mpsc::channel(16);
//! let manager = MqttClientManager::new(
//!     MqttSection::default(),
//!     None,
//!     InboundRouter::new(acknowledgements),
//! );
//!
//! if let Some(client) = manager.get(&onboarding("client-1")).await {
//!     client.publish("measures/client-1", b"{}".to_vec()).await?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod manager;
pub mod message_handler;

pub use client::RumqttTransportClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError};
pub use manager::{MqttClientManager, MqttConnectionStatus, SubscriptionsForMqttClient};
pub use message_handler::{EventRoute, InboundDisposition, InboundRouter, MessageHandler};
