//! Consumer side of the re-send channel

use super::{PublishNonTelemetryDataService, PublishOutcome, ResendMessageCacheEntryEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

pub struct ResendConsumer {
    publisher: Arc<PublishNonTelemetryDataService>,
}

impl ResendConsumer {
    pub fn new(publisher: Arc<PublishNonTelemetryDataService>) -> Self {
        Self { publisher }
    }

    /// Publish every received entry until the channel closes
    pub async fn run(self, mut events: mpsc::Receiver<ResendMessageCacheEntryEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Re-send channel closed.");
    }

    pub async fn handle(&self, event: ResendMessageCacheEntryEvent) -> Option<PublishOutcome> {
        match self.publisher.publish(event.parameters).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(
                    "Could not re-send cached message for endpoint '{}': {}",
                    event.external_endpoint_id,
                    e.log_message()
                );
                None
            }
        }
    }
}
