use async_trait::async_trait;

use super::EndpointPlugin;
use crate::models::AuthType;

/// Prometheus-style metrics endpoints, reached with HTTP Basic credentials only.
pub struct MetricsPlugin;

#[async_trait]
impl EndpointPlugin for MetricsPlugin {
    fn endpoint_type(&self) -> &str {
        "metrics"
    }

    fn supports(&self, auth_type: AuthType) -> bool {
        auth_type == AuthType::HttpBasic
    }
}
