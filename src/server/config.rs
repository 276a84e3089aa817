//! Server construction inputs.
//!
//! Everything the dispatcher and controllers consume at construction time,
//! as plain data with conventional defaults. The trait-object fields are the
//! named external collaborators: webhook service resolution, client
//! credentials, the admission chain and the fallback handler.

use std::sync::Arc;
use std::time::Duration;

use super::admission::{AdmissionChain, NoopAdmission};
use super::request::{ApiRequest, ApiResponse};
use crate::conversion::{ClusterServiceResolver, ServiceResolver};

pub use crate::conversion::AuthInfoResolver;

/// The fallback handler for paths this server does not own.
#[async_trait::async_trait]
pub trait DelegateHandler: Send + Sync {
    /// Handles a request that matched no registered type.
    async fn handle(&self, request: ApiRequest) -> ApiResponse;
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Default deadline imposed on non-watch requests.
    pub request_timeout: Duration,

    /// Lower bound for long-running (watch) requests.
    pub min_request_timeout: Duration,

    /// Request size ceiling, also the denominator in rule cardinality
    /// estimation.
    pub max_request_body_bytes: usize,

    /// Number of peer servers; above one, establishing waits for peers.
    pub master_count: usize,

    /// Per-call timeout for conversion webhooks.
    pub webhook_timeout: Duration,

    /// Delay before flipping Established when `master_count` > 1.
    pub establishing_delay: Duration,

    /// How long replaced serving info lingers after its last request drains.
    pub teardown_linger: Duration,

    /// Maps webhook service references to concrete URLs.
    pub service_resolver: Arc<dyn ServiceResolver>,

    /// Supplies client certificates / tokens for webhook calls.
    pub auth_info_resolver: Option<Arc<dyn AuthInfoResolver>>,

    /// The configured mutating and validating admission plugins.
    pub admission: Arc<dyn AdmissionChain>,

    /// The fallback handler for paths this core does not own.
    pub delegate: Option<Arc<dyn DelegateHandler>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            request_timeout: Duration::from_secs(60),
            min_request_timeout: Duration::from_secs(1800),
            max_request_body_bytes: 3 * 1024 * 1024,
            master_count: 1,
            webhook_timeout: Duration::from_secs(10),
            establishing_delay: Duration::from_secs(5),
            teardown_linger: Duration::from_secs(10),
            service_resolver: Arc::new(ClusterServiceResolver),
            auth_info_resolver: None,
            admission: Arc::new(NoopAdmission),
            delegate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_request_body_bytes, 3 * 1024 * 1024);
        assert_eq!(config.master_count, 1);
        assert_eq!(config.webhook_timeout, Duration::from_secs(10));
        assert_eq!(config.establishing_delay, Duration::from_secs(5));
    }
}
