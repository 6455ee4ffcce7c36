//! Endpoint types and their connection behaviour.

pub mod cf;
pub mod connector;
pub mod metrics;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{AuthProviderRegistry, LoginCredentials, TokenAcquirer};
use crate::errors::AppError;
use crate::http_client::HttpClientPool;
use crate::models::{AuthType, EndpointRecord, TokenOwner, TokenRecord};

pub use connector::{AutoLinkHook, ConnectRequest, EndpointConnector};

/// Everything a plugin needs to obtain a credential.
pub struct ConnectContext<'a> {
    pub acquirer: &'a TokenAcquirer,
    pub providers: &'a AuthProviderRegistry,
    pub auth_type: AuthType,
    pub credentials: &'a LoginCredentials,
}

pub struct ValidateContext<'a> {
    pub clients: &'a HttpClientPool,
    pub providers: &'a AuthProviderRegistry,
}

/// A freshly issued credential and whether it carries the endpoint's admin scope.
pub struct Connection {
    pub token: TokenRecord,
    pub admin: bool,
}

#[async_trait]
pub trait EndpointPlugin: Send + Sync {
    /// Value of `cnsi_type` this plugin handles.
    fn endpoint_type(&self) -> &str;

    /// Endpoints of this type may be registered from configuration at startup.
    fn auto_register(&self) -> bool {
        false
    }

    fn admin_scope(&self) -> Option<&str> {
        None
    }

    fn supports(&self, _auth_type: AuthType) -> bool {
        true
    }

    async fn connect(
        &self,
        ctx: &ConnectContext<'_>,
        endpoint: &EndpointRecord,
        _owner: &TokenOwner,
    ) -> Result<Connection, AppError> {
        if !self.supports(ctx.auth_type) {
            return Err(AppError::ConnectFailed(format!(
                "{} endpoints do not accept {} credentials",
                self.endpoint_type(),
                ctx.auth_type
            )));
        }
        let provider = ctx.providers.lookup(ctx.auth_type);
        let token = (provider.connect)(ctx.acquirer, endpoint, ctx.credentials).await?;
        let admin = (provider.user_info)(&token, self.admin_scope())
            .map(|user| user.admin)
            .unwrap_or(false);
        Ok(Connection { token, admin })
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_>,
        _owner: &TokenOwner,
        endpoint: &EndpointRecord,
        token: &TokenRecord,
    ) -> Result<(), AppError> {
        (ctx.providers.lookup(token.auth_type).validate)(endpoint, token)
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn EndpointPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin(cf_admin_scope: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(cf::CloudFoundryPlugin::new(cf_admin_scope)));
        registry.register(Arc::new(metrics::MetricsPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn EndpointPlugin>) {
        let endpoint_type = plugin.endpoint_type().to_string();
        tracing::debug!(endpoint_type = %endpoint_type, "registering endpoint plugin");
        self.plugins.insert(endpoint_type, plugin);
    }

    pub fn get(&self, endpoint_type: &str) -> Option<Arc<dyn EndpointPlugin>> {
        self.plugins.get(endpoint_type).cloned()
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
