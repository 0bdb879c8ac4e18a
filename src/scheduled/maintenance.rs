//! Housekeeping jobs that only run while the platform is operational

use super::{PlatformStatus, ScheduledJob};
use crate::acknowledgement::AcknowledgementStore;
use crate::cache::MessageCache;
use crate::error::MiddlewareResult;
use crate::observability::metrics::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Drains the message cache into the re-send channel
pub struct MessageCacheSendingJob {
    cache: Arc<dyn MessageCache>,
    platform: Arc<dyn PlatformStatus>,
}

impl MessageCacheSendingJob {
    pub fn new(cache: Arc<dyn MessageCache>, platform: Arc<dyn PlatformStatus>) -> Self {
        Self { cache, platform }
    }

    /// Number of entries handed to the re-send consumer, `None` if skipped
    pub async fn send_from_cache(&self) -> MiddlewareResult<Option<usize>> {
        if !self.platform.is_operational().await {
            debug!("Scheduled message sending from cache skipped because the platform is not operational.");
            return Ok(None);
        }
        debug!("Scheduled message sending from cache.");
        let resent = self.cache.send_messages()?;
        if resent > 0 {
            info!("Handed {} cached messages over for re-sending.", resent);
        }
        Ok(Some(resent))
    }
}

#[async_trait]
impl ScheduledJob for MessageCacheSendingJob {
    fn name(&self) -> &'static str {
        "empty_message_cache"
    }

    async fn run(&self) -> MiddlewareResult<()> {
        self.send_from_cache().await.map(|_| ())
    }
}

/// Forgets messages whose ACK never arrived within the sweep window
pub struct AcknowledgementSweepJob {
    store: Arc<AcknowledgementStore>,
    platform: Arc<dyn PlatformStatus>,
}

impl AcknowledgementSweepJob {
    pub fn new(store: Arc<AcknowledgementStore>, platform: Arc<dyn PlatformStatus>) -> Self {
        Self { store, platform }
    }

    /// Number of entries removed, `None` if skipped
    pub async fn sweep(&self) -> Option<usize> {
        if !self.platform.is_operational().await {
            debug!("Clearing all messages waiting for ACK skipped because the platform is not operational.");
            return None;
        }
        debug!("Clearing all messages waiting for ACK.");
        let removed = self.store.clear_all_older_than_sweep_window();
        metrics().acknowledgements_swept(removed);
        if removed > 0 {
            info!(
                "Removed {} messages waiting for ACK older than {} seconds.",
                removed,
                self.store.sweep_window().as_secs()
            );
        }
        Some(removed)
    }
}

#[async_trait]
impl ScheduledJob for AcknowledgementSweepJob {
    fn name(&self) -> &'static str {
        "message_waiting_for_ack_removal"
    }

    async fn run(&self) -> MiddlewareResult<()> {
        self.sweep().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acknowledgement::AcknowledgementEntry;
    use crate::cache::PersistentMessageCache;
    use crate::protocol::TechnicalMessageType;
    use crate::testing::mocks::StaticPlatformStatus;

    #[tokio::test]
    async fn test_sweep_is_gated_by_platform_status() {
        let store = Arc::new(AcknowledgementStore::default());
        let mut entry = AcknowledgementEntry::new("ar-1", "old", TechnicalMessageType::ListEndpoints);
        entry.created -= 8 * 24 * 60 * 60;
        store.save(entry);

        let platform = Arc::new(StaticPlatformStatus::down());
        let job = AcknowledgementSweepJob::new(store.clone(), platform.clone());
        assert_eq!(job.sweep().await, None);
        assert_eq!(store.len(), 1);

        platform.set_operational(true);
        assert_eq!(job.sweep().await, Some(1));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_cache_backend_fails_the_tick() {
        let job = MessageCacheSendingJob::new(
            Arc::new(PersistentMessageCache::new()),
            Arc::new(StaticPlatformStatus::operational()),
        );
        assert!(job.send_from_cache().await.is_err());

        let skipped = MessageCacheSendingJob::new(
            Arc::new(PersistentMessageCache::new()),
            Arc::new(StaticPlatformStatus::down()),
        );
        assert_eq!(skipped.send_from_cache().await.unwrap(), None);
    }
}
