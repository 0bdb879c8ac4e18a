//! Failed cloud onboardings, keyed by the virtual endpoint they were meant to create

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Error code used when the platform attached no message to the failure
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

pub const DEFAULT_FAILURE_MESSAGE: &str =
    "There was an error while sending the message to the platform. Please check if the endpoint is available.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudOnboardingFailure {
    /// Epoch seconds
    pub timestamp: i64,
    pub external_endpoint_id: String,
    pub virtual_external_endpoint_id: String,
    pub error_code: String,
    pub error_message: String,
}

/// Latest failure per virtual endpoint, kept in memory only
#[derive(Debug, Default)]
pub struct CloudOnboardingFailureCache {
    failures: DashMap<String, CloudOnboardingFailure>,
}

impl CloudOnboardingFailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        external_endpoint_id: &str,
        virtual_external_endpoint_id: &str,
        error_code: &str,
        error_message: &str,
    ) {
        debug!(
            "Cloud onboarding of '{}' below '{}' failed with {}.",
            virtual_external_endpoint_id, external_endpoint_id, error_code
        );
        self.failures.insert(
            virtual_external_endpoint_id.to_string(),
            CloudOnboardingFailure {
                timestamp: Utc::now().timestamp(),
                external_endpoint_id: external_endpoint_id.to_string(),
                virtual_external_endpoint_id: virtual_external_endpoint_id.to_string(),
                error_code: error_code.to_string(),
                error_message: error_message.to_string(),
            },
        );
    }

    /// Failures of every virtual endpoint below the endpoint
    pub fn get(&self, external_endpoint_id: &str) -> Vec<CloudOnboardingFailure> {
        let mut failures: Vec<CloudOnboardingFailure> = self
            .failures
            .iter()
            .filter(|entry| entry.external_endpoint_id == external_endpoint_id)
            .map(|entry| entry.value().clone())
            .collect();
        failures.sort_by(|a, b| a.virtual_external_endpoint_id.cmp(&b.virtual_external_endpoint_id));
        failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_failure_per_virtual_endpoint_wins() {
        let cache = CloudOnboardingFailureCache::new();
        cache.put("ext-1", "virtual-1", UNKNOWN_ERROR, "first");
        cache.put("ext-1", "virtual-1", "VAL_000022", "second");
        cache.put("ext-1", "virtual-2", UNKNOWN_ERROR, DEFAULT_FAILURE_MESSAGE);
        cache.put("ext-2", "virtual-3", UNKNOWN_ERROR, DEFAULT_FAILURE_MESSAGE);

        let failures = cache.get("ext-1");
        assert_eq!(cache.len(), 3);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].virtual_external_endpoint_id, "virtual-1");
        assert_eq!(failures[0].error_code, "VAL_000022");
        assert_eq!(failures[0].error_message, "second");
        assert!(cache.get("ext-unknown").is_empty());
    }
}
