use async_trait::async_trait;

use super::{EndpointPlugin, ValidateContext};
use crate::errors::AppError;
use crate::models::{AuthType, EndpointRecord, TokenOwner, TokenRecord};

/// Cloud Foundry. Besides the local token check, a new credential must be
/// accepted by the Cloud Controller itself.
pub struct CloudFoundryPlugin {
    admin_scope: String,
}

impl CloudFoundryPlugin {
    pub fn new(admin_scope: impl Into<String>) -> Self {
        Self {
            admin_scope: admin_scope.into(),
        }
    }
}

#[async_trait]
impl EndpointPlugin for CloudFoundryPlugin {
    fn endpoint_type(&self) -> &str {
        "cf"
    }

    fn auto_register(&self) -> bool {
        true
    }

    fn admin_scope(&self) -> Option<&str> {
        Some(&self.admin_scope)
    }

    fn supports(&self, auth_type: AuthType) -> bool {
        matches!(auth_type, AuthType::OAuth2 | AuthType::HttpBasic | AuthType::Oidc)
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_>,
        _owner: &TokenOwner,
        endpoint: &EndpointRecord,
        token: &TokenRecord,
    ) -> Result<(), AppError> {
        (ctx.providers.lookup(token.auth_type).validate)(endpoint, token)?;

        let url = format!("{}/v2/info", endpoint.api_endpoint.trim_end_matches('/'));
        let authorization = match token.auth_type {
            AuthType::HttpBasic => token.auth_token.clone(),
            AuthType::OAuth2 | AuthType::Oidc => format!("bearer {}", token.auth_token),
        };

        let res = ctx
            .clients
            .for_method(&reqwest::Method::GET, endpoint.skip_ssl_validation)
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %endpoint.guid, "cloud controller unreachable: {}", e);
                AppError::ValidationFailed("could not reach the Cloud Controller".into())
            })?;

        if !res.status().is_success() {
            return Err(AppError::ValidationFailed(format!(
                "Cloud Controller rejected the credential ({})",
                res.status()
            )));
        }
        Ok(())
    }
}
