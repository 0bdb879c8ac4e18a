//! Business operation log
//!
//! One line per endpoint-level operation outcome. The default sink writes to
//! the `audit` tracing target so operators can route it on its own.

use serde::Serialize;
use std::fmt;
use tracing::info;

/// Placeholder for an identifier that is not known at log time
pub const NA: &str = "N/A";

/// Identifies the endpoint an audit line belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointLogInformation {
    pub external_endpoint_id: String,
    pub agrirouter_endpoint_id: String,
}

impl EndpointLogInformation {
    pub fn new<E: Into<String>, A: Into<String>>(
        external_endpoint_id: E,
        agrirouter_endpoint_id: A,
    ) -> Self {
        Self {
            external_endpoint_id: external_endpoint_id.into(),
            agrirouter_endpoint_id: agrirouter_endpoint_id.into(),
        }
    }

    pub fn external_only<E: Into<String>>(external_endpoint_id: E) -> Self {
        Self::new(external_endpoint_id, NA)
    }
}

impl fmt::Display for EndpointLogInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.external_endpoint_id, self.agrirouter_endpoint_id
        )
    }
}

pub trait AuditLog: Send + Sync {
    fn log(&self, endpoint: &EndpointLogInformation, message: &str);
}

/// Writes audit lines as structured tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn log(&self, endpoint: &EndpointLogInformation, message: &str) {
        info!(
            target: "audit",
            external_endpoint_id = %endpoint.external_endpoint_id,
            agrirouter_endpoint_id = %endpoint.agrirouter_endpoint_id,
            "{}",
            message
        );
    }
}
