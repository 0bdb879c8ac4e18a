//! Messages waiting for an acknowledgement from the platform
//!
//! Every request that expects an asynchronous answer is registered here under
//! its application message id. The inbound acknowledgement resolves and
//! removes the entry; entries whose answer never arrives are reclaimed by the
//! periodic sweep and nothing else happens to them.

use crate::endpoint::Endpoint;
use crate::protocol::TechnicalMessageType;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace};

pub mod failures;
pub mod handler;

pub use failures::{CloudOnboardingFailure, CloudOnboardingFailureCache};
pub use handler::{AcknowledgementEvent, AcknowledgementHandler, FollowUpEvent};

/// Default sweep window: one week
pub const DEFAULT_SWEEP_WINDOW: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// A sent message whose acknowledgement is still outstanding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcknowledgementEntry {
    pub agrirouter_endpoint_id: String,
    pub message_id: String,
    pub technical_message_type: TechnicalMessageType,
    /// Epoch seconds
    pub created: i64,
    /// Set once an acknowledgement or error arrived
    pub response: Option<String>,
    pub dynamic_properties: HashMap<String, serde_json::Value>,
}

impl AcknowledgementEntry {
    pub fn new<E: Into<String>, M: Into<String>>(
        agrirouter_endpoint_id: E,
        message_id: M,
        technical_message_type: TechnicalMessageType,
    ) -> Self {
        Self {
            agrirouter_endpoint_id: agrirouter_endpoint_id.into(),
            message_id: message_id.into(),
            technical_message_type,
            created: Utc::now().timestamp(),
            response: None,
            dynamic_properties: HashMap::new(),
        }
    }

    pub fn with_dynamic_property<V: Into<serde_json::Value>>(mut self, key: &str, value: V) -> Self {
        self.dynamic_properties.insert(key.to_string(), value.into());
        self
    }

    pub fn dynamic_property_as_string(&self, key: &str) -> Option<&str> {
        self.dynamic_properties.get(key).and_then(|v| v.as_str())
    }

    pub fn dynamic_property_as_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.dynamic_properties.get(key)?.as_array().map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Created before `now - window`
    pub fn is_older_than(&self, window: Duration, now: i64) -> bool {
        self.created < now - window.as_secs() as i64
    }
}

/// Process-wide registry of [`AcknowledgementEntry`] keyed by message id
///
/// Safe to share between the scheduled jobs and the inbound handling tasks.
/// Absence is always reported as `None` or an empty list.
#[derive(Debug)]
pub struct AcknowledgementStore {
    messages: DashMap<String, AcknowledgementEntry>,
    sweep_window: Duration,
}

impl Default for AcknowledgementStore {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_WINDOW)
    }
}

impl AcknowledgementStore {
    pub fn new(sweep_window: Duration) -> Self {
        Self {
            messages: DashMap::new(),
            sweep_window,
        }
    }

    /// Insert or overwrite under the entry's message id
    pub fn save(&self, entry: AcknowledgementEntry) {
        debug!(
            "Adding message waiting for ACK, currently there are {} messages waiting for ACK.",
            self.messages.len()
        );
        trace!("{:?}", entry);
        self.messages.insert(entry.message_id.clone(), entry);
    }

    pub fn find_by_message_id(&self, message_id: &str) -> Option<AcknowledgementEntry> {
        self.messages.get(message_id).map(|entry| entry.clone())
    }

    /// Record the platform's answer on a pending entry
    ///
    /// Returns false if the entry is no longer present.
    pub fn set_response(&self, message_id: &str, response: String) -> bool {
        match self.messages.get_mut(message_id) {
            Some(mut entry) => {
                entry.response = Some(response);
                true
            }
            None => false,
        }
    }

    /// Remove by message id; deleting an absent entry is a no-op
    pub fn delete(&self, entry: &AcknowledgementEntry) {
        self.delete_by_message_id(&entry.message_id);
    }

    pub fn delete_by_message_id(&self, message_id: &str) {
        if self.messages.remove(message_id).is_some() {
            debug!(
                "Removed message '{}' waiting for ACK, now there are {} messages waiting for ACK.",
                message_id,
                self.messages.len()
            );
        }
    }

    pub fn find_all_for_endpoint(&self, agrirouter_endpoint_id: &str) -> Vec<AcknowledgementEntry> {
        self.messages
            .iter()
            .filter(|entry| entry.agrirouter_endpoint_id == agrirouter_endpoint_id)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Delete every entry created before `now - window`, returning the count
    pub fn clear_older_than(&self, window: Duration) -> usize {
        let now = Utc::now().timestamp();
        let mut removed = 0;
        self.messages.retain(|_, entry| {
            let expired = entry.is_older_than(window, now);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }

    /// Sweep with the configured window (one week unless configured)
    pub fn clear_all_older_than_sweep_window(&self) -> usize {
        info!(
            "Clearing all messages waiting for ACK older than {} seconds.",
            self.sweep_window.as_secs()
        );
        debug!(
            "Currently there are {} messages waiting for ACK in total.",
            self.messages.len()
        );
        let removed = self.clear_older_than(self.sweep_window);
        debug!("Removed {} messages waiting for ACK.", removed);
        removed
    }

    /// Drop the bookkeeping of an endpoint that is being deleted
    pub fn delete_all_for_endpoint(&self, endpoint: &Endpoint) -> usize {
        info!(
            "Deleting all messages waiting for ACK for endpoint {}.",
            endpoint.agrirouter_endpoint_id
        );
        let mut removed = 0;
        self.messages.retain(|_, entry| {
            let owned = entry.agrirouter_endpoint_id == endpoint.agrirouter_endpoint_id;
            if owned {
                removed += 1;
            }
            !owned
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn sweep_window(&self) -> Duration {
        self.sweep_window
    }
}
