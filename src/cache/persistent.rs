//! Persistent cache backend placeholder
//!
//! Selecting `backend = "persistent"` keeps the service running, but every
//! operation fails with an unsupported-operation error until a storage and
//! replacement policy exist for it.

use super::MessageCache;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::protocol::PublishNonTelemetryDataParameters;

#[derive(Debug, Default)]
pub struct PersistentMessageCache;

impl PersistentMessageCache {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCache for PersistentMessageCache {
    fn put(
        &self,
        _external_endpoint_id: &str,
        _parameters: PublishNonTelemetryDataParameters,
    ) -> MiddlewareResult<()> {
        Err(MiddlewareError::unsupported("persistent message cache put"))
    }

    fn count_current_message_cache_entries(
        &self,
        _external_endpoint_id: &str,
    ) -> MiddlewareResult<usize> {
        Err(MiddlewareError::unsupported("persistent message cache count"))
    }

    fn send_messages(&self) -> MiddlewareResult<usize> {
        Err(MiddlewareError::unsupported("persistent message cache send"))
    }

    fn clear(&self) -> MiddlewareResult<()> {
        Err(MiddlewareError::unsupported("persistent message cache clear"))
    }
}
