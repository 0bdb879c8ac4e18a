//! agrirouter middleware core
//!
//! Keeps the endpoints of an agrirouter middleware connected to the platform:
//! - MQTT client management per onboarding identity
//! - Tracking of messages waiting for an acknowledgement
//! - A message cache with periodic at-most-once re-sending
//! - Cron scheduled connection checks and platform queries
//!
//! # Quick Start
//!
//! ```rust
//! use agrirouter_middleware::acknowledgement::{AcknowledgementEntry, AcknowledgementStore};
//! use agrirouter_middleware::protocol::TechnicalMessageType;
//!
//! let store = AcknowledgementStore::default();
//! store.save(AcknowledgementEntry::new(
//!     "EP1",
//!     "MSG-1",
//!     TechnicalMessageType::FeedHeaderQuery,
//! ));
//!
//! let entry = store.find_by_message_id("MSG-1").unwrap();
//! assert_eq!(entry.technical_message_type.key(), "dke:feed_header_query");
//! assert_eq!(store.find_all_for_endpoint("EP1").len(), 1);
//! ```

pub mod acknowledgement;
pub mod audit;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod protocol;
pub mod scheduled;
pub mod status;
pub mod testing;
pub mod transport;

pub use acknowledgement::{AcknowledgementEntry, AcknowledgementStore};
pub use cache::{MessageCache, TransientMessageCache};
pub use config::MiddlewareConfig;
pub use endpoint::Endpoint;
pub use error::{MiddlewareError, MiddlewareResult};
pub use middleware::Middleware;
pub use scheduled::ConnectionSupervisor;
