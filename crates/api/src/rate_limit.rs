//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Limits the analysis endpoints per client IP using tower_governor.
//! Uses the Generic Cell Rate Algorithm (GCRA), which needs no background
//! process to replenish quotas.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Governor config with `X-RateLimit-*` response headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Seconds to replenish one request
    #[serde(alias = "per_second")]
    pub replenish_seconds: u64,
    /// Requests that can be made immediately
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replenish_seconds: 2,
            burst_size: 5,
        }
    }
}

/// Build the governor config.
///
/// Keys on the peer IP, so the server must be run with
/// `into_make_service_with_connect_info::<SocketAddr>()`. Returns `None` for a
/// zero period or burst, which governor rejects.
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<DefaultGovernorConfig>> {
    GovernorConfigBuilder::default()
        .per_second(config.replenish_seconds)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
