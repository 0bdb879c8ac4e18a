//! Holding area for outbound non-telemetry messages
//!
//! Messages that cannot be published right away are parked here and handed to
//! the re-send consumer by the periodic cache job. Every sweep drains the cache
//! before anything is re-sent, so delivery is at most once and the cache never
//! grows without bound when re-sending keeps failing.

use crate::error::MiddlewareResult;
use crate::observability::metrics::metrics;
use crate::protocol::PublishNonTelemetryDataParameters;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod persistent;
pub mod publish;
pub mod resend;
pub mod transient;

pub use persistent::PersistentMessageCache;
pub use publish::{PublishNonTelemetryDataService, PublishOutcome};
pub use resend::ResendConsumer;
pub use transient::TransientMessageCache;

/// Storage contract shared by the cache backends
pub trait MessageCache: Send + Sync {
    /// Park a message for the endpoint
    fn put(
        &self,
        external_endpoint_id: &str,
        parameters: PublishNonTelemetryDataParameters,
    ) -> MiddlewareResult<()>;

    /// Number of parked messages for the endpoint, for status views only
    fn count_current_message_cache_entries(&self, external_endpoint_id: &str)
        -> MiddlewareResult<usize>;

    /// Drain the cache and emit a re-send event per unexpired entry
    ///
    /// Returns the number of events emitted.
    fn send_messages(&self) -> MiddlewareResult<usize>;

    fn clear(&self) -> MiddlewareResult<()>;
}

/// A parked message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCacheEntry {
    pub external_endpoint_id: String,
    pub parameters: PublishNonTelemetryDataParameters,
    /// Epoch seconds
    pub created_at: i64,
    /// Seconds, 0 never expires
    pub ttl: u64,
}

impl MessageCacheEntry {
    pub fn new<S: Into<String>>(
        external_endpoint_id: S,
        parameters: PublishNonTelemetryDataParameters,
        ttl: u64,
    ) -> Self {
        Self {
            external_endpoint_id: external_endpoint_id.into(),
            parameters,
            created_at: Utc::now().timestamp(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.ttl != 0 && now - self.created_at > self.ttl as i64
    }
}

/// Instruction to publish a cached message again
#[derive(Debug, Clone, PartialEq)]
pub struct ResendMessageCacheEntryEvent {
    pub external_endpoint_id: String,
    pub parameters: PublishNonTelemetryDataParameters,
}

/// Channel between the cache and the [`ResendConsumer`]
pub fn resend_channel(
    capacity: usize,
) -> (
    mpsc::Sender<ResendMessageCacheEntryEvent>,
    mpsc::Receiver<ResendMessageCacheEntryEvent>,
) {
    mpsc::channel(capacity)
}

/// Emit a re-send event for every snapshot entry that has not expired
///
/// Entries that do not fit into the channel are dropped with a warning.
pub(crate) fn resend_unexpired(
    snapshot: Vec<MessageCacheEntry>,
    sender: &mpsc::Sender<ResendMessageCacheEntryEvent>,
) -> usize {
    let now = Utc::now().timestamp();
    let mut emitted = 0;
    for entry in snapshot {
        if entry.is_expired_at(now) {
            debug!(
                "Message cache entry for endpoint '{}' expired. Skipping.",
                entry.external_endpoint_id
            );
            metrics().cache_entry_expired();
            continue;
        }

        debug!(
            "Sending message from cache for endpoint '{}'.",
            entry.external_endpoint_id
        );
        let event = ResendMessageCacheEntryEvent {
            external_endpoint_id: entry.external_endpoint_id,
            parameters: entry.parameters,
        };
        match sender.try_send(event) {
            Ok(()) => {
                metrics().cache_entry_resent();
                emitted += 1;
            }
            Err(mpsc::error::TrySendError::Full(event)) => warn!(
                "Re-send queue is full, dropping cached message for endpoint '{}'.",
                event.external_endpoint_id
            ),
            Err(mpsc::error::TrySendError::Closed(event)) => warn!(
                "Re-send queue is closed, dropping cached message for endpoint '{}'.",
                event.external_endpoint_id
            ),
        }
    }
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(endpoint: &str) -> PublishNonTelemetryDataParameters {
        PublishNonTelemetryDataParameters {
            external_endpoint_id: endpoint.to_string(),
            base64_encoded_message_content: "SGVsbG8=".to_string(),
            content_message_type: "iso:11783:-10:taskdata:zip".to_string(),
            filename: None,
            recipients: Vec::new(),
        }
    }

    #[test]
    fn test_expiry_is_strictly_greater_than_ttl() {
        let mut entry = MessageCacheEntry::new("ep", parameters("ep"), 60);
        entry.created_at = 1_000;
        assert!(!entry.is_expired_at(1_060));
        assert!(entry.is_expired_at(1_061));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let mut entry = MessageCacheEntry::new("ep", parameters("ep"), 0);
        entry.created_at = 0;
        assert!(!entry.is_expired_at(i64::MAX / 2));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (sender, mut receiver) = resend_channel(1);
        let snapshot = vec![
            MessageCacheEntry::new("a", parameters("a"), 60),
            MessageCacheEntry::new("b", parameters("b"), 60),
        ];
        assert_eq!(resend_unexpired(snapshot, &sender), 1);
        assert_eq!(receiver.try_recv().unwrap().external_endpoint_id, "a");
        assert!(receiver.try_recv().is_err());
    }
}
