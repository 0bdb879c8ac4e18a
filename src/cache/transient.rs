//! In-memory cache backend

use super::{
    resend_unexpired, MessageCache, MessageCacheEntry, ResendMessageCacheEntryEvent,
};
use crate::error::MiddlewareResult;
use crate::protocol::PublishNonTelemetryDataParameters;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Keeps the latest parked message per endpoint
///
/// A second `put` for the same endpoint before the next sweep replaces the
/// first message.
#[derive(Debug)]
pub struct TransientMessageCache {
    entries: DashMap<String, MessageCacheEntry>,
    ttl: u64,
    sender: mpsc::Sender<ResendMessageCacheEntryEvent>,
}

impl TransientMessageCache {
    pub fn new(ttl: u64, sender: mpsc::Sender<ResendMessageCacheEntryEvent>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            sender,
        }
    }

    /// Park a prepared entry as is
    pub fn put_entry(&self, entry: MessageCacheEntry) {
        self.entries.insert(entry.external_endpoint_id.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry out of the map in one pass
    fn drain(&self) -> Vec<MessageCacheEntry> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, entry)| entry))
            .collect()
    }
}

impl MessageCache for TransientMessageCache {
    fn put(
        &self,
        external_endpoint_id: &str,
        parameters: PublishNonTelemetryDataParameters,
    ) -> MiddlewareResult<()> {
        info!("Saving message to cache.");
        trace!("External endpoint id: {}", external_endpoint_id);
        self.put_entry(MessageCacheEntry::new(
            external_endpoint_id,
            parameters,
            self.ttl,
        ));
        Ok(())
    }

    fn count_current_message_cache_entries(
        &self,
        external_endpoint_id: &str,
    ) -> MiddlewareResult<usize> {
        Ok(usize::from(self.entries.contains_key(external_endpoint_id)))
    }

    fn send_messages(&self) -> MiddlewareResult<usize> {
        let snapshot = self.drain();
        debug!("Re-sending {} messages from cache.", snapshot.len());
        Ok(resend_unexpired(snapshot, &self.sender))
    }

    fn clear(&self) -> MiddlewareResult<()> {
        self.entries.clear();
        debug!("Cleared cache.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::resend_channel;

    fn parameters(content: &str) -> PublishNonTelemetryDataParameters {
        PublishNonTelemetryDataParameters {
            external_endpoint_id: "ep".to_string(),
            base64_encoded_message_content: content.to_string(),
            content_message_type: "iso:11783:-10:taskdata:zip".to_string(),
            filename: Some("task.zip".to_string()),
            recipients: vec!["r1".to_string()],
        }
    }

    #[test]
    fn test_newer_put_replaces_older_one() {
        let (sender, mut receiver) = resend_channel(8);
        let cache = TransientMessageCache::new(60, sender);
        cache.put("ep", parameters("first")).unwrap();
        cache.put("ep", parameters("second")).unwrap();
        assert_eq!(cache.count_current_message_cache_entries("ep").unwrap(), 1);

        assert_eq!(cache.send_messages().unwrap(), 1);
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.parameters.base64_encoded_message_content, "second");
    }

    #[test]
    fn test_drains_even_when_nothing_can_be_sent() {
        let (sender, receiver) = resend_channel(8);
        drop(receiver);
        let cache = TransientMessageCache::new(60, sender);
        cache.put("ep-1", parameters("a")).unwrap();
        cache.put("ep-2", parameters("b")).unwrap();

        assert_eq!(cache.send_messages().unwrap(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let (sender, _receiver) = resend_channel(8);
        let cache = TransientMessageCache::new(60, sender);
        cache.put("ep", parameters("a")).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.count_current_message_cache_entries("ep").unwrap(), 0);
    }
}
