//! Connecting users (or the shared owner) to registered endpoints, and handing out
//! the right credential afterwards.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;

use super::{ConnectContext, PluginRegistry, ValidateContext};
use crate::auth::refresh::RefreshGuards;
use crate::auth::{
    jwt, AuthProviderRegistry, ClientCredentials, ConsoleIdentity, Grant, JwtUserTokenInfo,
    LoginCredentials, LoginHook, TokenAcquirer,
};
use crate::errors::AppError;
use crate::models::endpoint::same_url;
use crate::models::{
    AuthType, ConnectedUser, EndpointRecord, LoginResponse, TokenKey, TokenOwner, TokenRecord,
};
use crate::store::EndpointRepository;
use crate::vault::CredentialStore;

pub struct ConnectRequest {
    pub auth_type: AuthType,
    pub credentials: LoginCredentials,
    pub system_shared: bool,
}

pub struct EndpointConnector {
    endpoints: Arc<dyn EndpointRepository>,
    credentials: Arc<CredentialStore>,
    console: Arc<ConsoleIdentity>,
    acquirer: Arc<TokenAcquirer>,
    plugins: PluginRegistry,
    providers: AuthProviderRegistry,
    auto_register_url: Option<String>,
    refresh: RefreshGuards,
}

impl EndpointConnector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        credentials: Arc<CredentialStore>,
        console: Arc<ConsoleIdentity>,
        acquirer: Arc<TokenAcquirer>,
        plugins: PluginRegistry,
        providers: AuthProviderRegistry,
        auto_register_url: Option<String>,
    ) -> Self {
        Self {
            endpoints,
            credentials,
            console,
            acquirer,
            plugins,
            providers,
            auto_register_url,
            refresh: RefreshGuards::new(),
        }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn providers(&self) -> &AuthProviderRegistry {
        &self.providers
    }

    pub async fn endpoint(&self, guid: &str) -> Result<EndpointRecord, AppError> {
        self.endpoints
            .find(guid)
            .await?
            .ok_or_else(|| AppError::EndpointNotFound(guid.to_string()))
    }

    async fn require_admin(&self, user_guid: &str, denied: &str) -> Result<(), AppError> {
        match self.console.user(user_guid).await {
            Ok(user) if user.admin => Ok(()),
            Ok(_) => Err(AppError::PermissionDenied(denied.to_string())),
            Err(e) => {
                tracing::warn!(user = user_guid, "admin check failed: {}", e);
                Err(AppError::PermissionDenied(denied.to_string()))
            }
        }
    }

    /// Obtains a credential for the endpoint and stores it for the user, or for
    /// the shared owner when `system_shared` is set. A credential the endpoint does
    /// not accept is removed again before returning.
    pub async fn connect(
        &self,
        user_guid: Option<&str>,
        endpoint_guid: &str,
        request: ConnectRequest,
    ) -> Result<LoginResponse, AppError> {
        let endpoint = self.endpoint(endpoint_guid).await?;
        let user_guid = user_guid
            .filter(|u| !u.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let owner = if request.system_shared {
            self.require_admin(
                user_guid,
                "Can not connect System Shared endpoint - user is not an administrator",
            )
            .await?;
            TokenOwner::SystemShared
        } else {
            TokenOwner::user(user_guid)
        };

        let plugin = self
            .plugins
            .get(&endpoint.cnsi_type)
            .ok_or_else(|| AppError::UnsupportedEndpointType(endpoint.cnsi_type.clone()))?;

        let ctx = ConnectContext {
            acquirer: &self.acquirer,
            providers: &self.providers,
            auth_type: request.auth_type,
            credentials: &request.credentials,
        };
        let connection = plugin
            .connect(&ctx, &endpoint, &owner)
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %endpoint.guid, owner = %owner, "connect failed: {}", e);
                match e {
                    AppError::UpstreamAuth { .. }
                    | AppError::InvalidCredentials
                    | AppError::MissingState
                    | AppError::MissingParameter(_)
                    | AppError::ConnectFailed(_) => e,
                    other => AppError::ConnectFailed(other.user_message()),
                }
            })?;

        let key = TokenKey::endpoint(&endpoint.guid, owner.clone());
        let mut token = connection.token;
        token.system_shared = owner.is_system_shared();
        if let Err(e) = self.credentials.save(&key, &token).await {
            tracing::error!(endpoint = %endpoint.guid, "could not store endpoint token: {}", e);
            return Err(AppError::ConnectFailed("Failed to save Token for endpoint".into()));
        }

        let vctx = ValidateContext {
            clients: self.acquirer.clients(),
            providers: &self.providers,
        };
        if let Err(e) = plugin.validate(&vctx, &owner, &endpoint, &token).await {
            tracing::warn!(endpoint = %endpoint.guid, owner = %owner, "new token rejected: {}", e);
            if let Err(del) = self.credentials.delete(&key).await {
                tracing::error!(endpoint = %endpoint.guid, "could not remove rejected token: {}", del);
            }
            return Err(match e {
                AppError::ValidationFailed(_) => e,
                other => AppError::ValidationFailed(other.user_message()),
            });
        }

        let user = (self.providers.lookup(token.auth_type).user_info)(&token, plugin.admin_scope())
            .map(|u| if owner.is_system_shared() { u.sanitized() } else { u })
            .unwrap_or_else(ConnectedUser::unknown);

        tracing::info!(endpoint = %endpoint.guid, owner = %owner, auth_type = %token.auth_type, "endpoint connected");
        Ok(LoginResponse {
            account: owner.display_guid().to_string(),
            token_expiry: token.expiry_unix(),
            api_endpoint: Some(endpoint.api_endpoint.clone()),
            admin: connection.admin,
            user: Some(user),
        })
    }

    /// Removes the user's credential for the endpoint. When the user only has the
    /// shared credential, that one goes instead, which takes a console admin.
    pub async fn disconnect(
        &self,
        user_guid: Option<&str>,
        endpoint_guid: &str,
    ) -> Result<(), AppError> {
        let endpoint = self.endpoint(endpoint_guid).await?;
        let user_guid = user_guid
            .filter(|u| !u.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let owner = match self.effective_token(&endpoint.guid, user_guid).await? {
            Some((TokenOwner::SystemShared, _)) => {
                self.require_admin(
                    user_guid,
                    "Can not disconnect System Shared endpoint - user is not an administrator",
                )
                .await?;
                TokenOwner::SystemShared
            }
            _ => TokenOwner::user(user_guid),
        };

        self.clear_token(&endpoint, &owner).await?;
        tracing::info!(endpoint = %endpoint.guid, owner = %owner, "endpoint disconnected");
        Ok(())
    }

    /// Auto-registered endpoints keep a cleared placeholder so they are not
    /// reconnected behind the user's back; everything else is deleted.
    pub async fn clear_token(
        &self,
        endpoint: &EndpointRecord,
        owner: &TokenOwner,
    ) -> Result<(), AppError> {
        let key = TokenKey::endpoint(&endpoint.guid, owner.clone());
        if self.is_auto_registered(endpoint) {
            let mut placeholder = TokenRecord::cleared(AuthType::OAuth2);
            placeholder.system_shared = owner.is_system_shared();
            self.credentials.save(&key, &placeholder).await?;
            tracing::debug!(endpoint = %endpoint.guid, "kept cleared token for auto-registered endpoint");
        } else {
            self.credentials.delete(&key).await?;
        }
        Ok(())
    }

    pub fn is_auto_registered(&self, endpoint: &EndpointRecord) -> bool {
        let plugin_allows = self
            .plugins
            .get(&endpoint.cnsi_type)
            .is_some_and(|p| p.auto_register());
        plugin_allows
            && self
                .auto_register_url
                .as_deref()
                .is_some_and(|url| same_url(url, &endpoint.api_endpoint))
    }

    /// The user's own credential, else the shared one.
    pub async fn effective_token(
        &self,
        endpoint_guid: &str,
        user_guid: &str,
    ) -> Result<Option<(TokenOwner, TokenRecord)>, AppError> {
        let own = TokenOwner::user(user_guid);
        if let Some(token) = self
            .credentials
            .find(&TokenKey::endpoint(endpoint_guid, own.clone()))
            .await?
        {
            return Ok(Some((own, token)));
        }
        let shared = self
            .credentials
            .find(&TokenKey::endpoint(endpoint_guid, TokenOwner::SystemShared))
            .await?;
        Ok(shared.map(|token| (TokenOwner::SystemShared, token)))
    }

    /// A usable credential for the user, refreshed first when it has expired.
    pub async fn token_for(
        &self,
        endpoint_guid: &str,
        user_guid: &str,
    ) -> Result<TokenRecord, AppError> {
        let endpoint = self.endpoint(endpoint_guid).await?;
        let (owner, token) = self
            .effective_token(&endpoint.guid, user_guid)
            .await?
            .filter(|(_, token)| !token.disconnected)
            .ok_or_else(|| AppError::NotConnected(endpoint.guid.clone()))?;

        if token.is_expired_at(Utc::now()) && token.is_refreshable() {
            return self.refresh_endpoint_token(&endpoint, &owner, &token).await;
        }
        Ok(token)
    }

    async fn refresh_endpoint_token(
        &self,
        endpoint: &EndpointRecord,
        owner: &TokenOwner,
        observed: &TokenRecord,
    ) -> Result<TokenRecord, AppError> {
        let key = TokenKey::endpoint(&endpoint.guid, owner.clone());
        let _permit = self.refresh.lock(&key).await;

        let current = self
            .credentials
            .find(&key)
            .await?
            .ok_or_else(|| AppError::NotConnected(endpoint.guid.clone()))?;
        if RefreshGuards::superseded(observed, &current) {
            tracing::debug!(key = %key, "endpoint token already refreshed");
            return Ok(current);
        }

        let client = ClientCredentials::new(&endpoint.client_id, &endpoint.client_secret);
        let res = self
            .acquirer
            .acquire(
                &Grant::refresh(current.refresh_token.clone(), None),
                &client,
                &endpoint.token_url(),
                endpoint.skip_ssl_validation,
            )
            .await?;

        let expiry = match jwt::decode(&res.access_token) {
            Ok(info) => info.token_expiry,
            Err(e) => res.expiry_from_expires_in(Utc::now()).ok_or(e)?,
        };
        let refresh_token = if res.refresh_token.is_empty() {
            current.refresh_token.clone()
        } else {
            res.refresh_token
        };
        let record = TokenRecord {
            auth_token: res.access_token,
            refresh_token,
            token_expiry: Some(expiry),
            ..current
        };
        self.credentials.save(&key, &record).await?;
        tracing::info!(key = %key, expiry = %expiry, "endpoint token refreshed");
        Ok(record)
    }

    /// Who the user is connected to the endpoint as, if connected at all.
    pub async fn connected_user(
        &self,
        endpoint_guid: &str,
        user_guid: &str,
    ) -> Result<Option<ConnectedUser>, AppError> {
        let endpoint = self.endpoint(endpoint_guid).await?;
        let Some((owner, token)) = self.effective_token(&endpoint.guid, user_guid).await? else {
            return Ok(None);
        };
        if token.disconnected {
            return Ok(None);
        }
        let plugin = self.plugins.get(&endpoint.cnsi_type);
        let admin_scope = plugin.as_ref().and_then(|p| p.admin_scope());
        let user = (self.providers.lookup(token.auth_type).user_info)(&token, admin_scope);
        Ok(user.map(|u| if owner.is_system_shared() { u.sanitized() } else { u }))
    }

    /// Copies the user's console token to an endpoint that trusts the console's
    /// UAA, and marks the endpoint as SSO-capable. Returns false when the endpoint
    /// uses a different identity provider.
    pub async fn link_console_identity(
        &self,
        user_guid: &str,
        endpoint_guid: &str,
    ) -> Result<bool, AppError> {
        let endpoint = self.endpoint(endpoint_guid).await?;
        if !same_url(&endpoint.authorization_endpoint, &self.console.config().uaa_endpoint) {
            tracing::debug!(endpoint = %endpoint.guid, "endpoint does not share the console UAA");
            return Ok(false);
        }

        let console_token = self
            .console
            .token(user_guid)
            .await?
            .ok_or_else(|| AppError::SessionInvalid("Unable to find UAA Token".into()))?;
        let linked = TokenRecord {
            system_shared: false,
            disconnected: false,
            linked_guid: Some(user_guid.to_string()),
            ..console_token
        };
        self.credentials
            .save(&TokenKey::endpoint(&endpoint.guid, TokenOwner::user(user_guid)), &linked)
            .await?;

        if !endpoint.sso_allowed {
            self.endpoints.set_sso_allowed(&endpoint.guid, true).await?;
        }
        tracing::info!(endpoint = %endpoint.guid, user = user_guid, "linked console identity");
        Ok(true)
    }

    /// Links the console identity to every auto-registered endpoint the user has
    /// not explicitly disconnected from.
    pub async fn link_auto_registered(&self, user_guid: &str) -> Result<usize, AppError> {
        let mut linked = 0;
        for endpoint in self.endpoints.list().await? {
            if !self.is_auto_registered(&endpoint) {
                continue;
            }
            let key = TokenKey::endpoint(&endpoint.guid, TokenOwner::user(user_guid));
            if self.credentials.find(&key).await?.is_some() {
                continue;
            }
            if self.link_console_identity(user_guid, &endpoint.guid).await? {
                linked += 1;
            }
        }
        Ok(linked)
    }
}

/// Login hook that connects fresh console sessions to auto-registered endpoints.
pub struct AutoLinkHook {
    connector: Weak<EndpointConnector>,
}

impl AutoLinkHook {
    pub fn new(connector: Weak<EndpointConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl LoginHook for AutoLinkHook {
    fn name(&self) -> &str {
        "auto-link"
    }

    async fn on_login(&self, user: &JwtUserTokenInfo) -> anyhow::Result<()> {
        let Some(connector) = self.connector.upgrade() else {
            return Ok(());
        };
        let linked = connector
            .link_auto_registered(&user.user_guid)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if linked > 0 {
            tracing::info!(user = %user.user_guid, linked, "auto-connected endpoints");
        }
        Ok(())
    }
}
