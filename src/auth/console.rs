//! The console's own identity: logging users in against the console UAA, keeping
//! their UAA token fresh, and answering "who is this user" questions from it.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::grant::{ClientCredentials, Grant, TokenAcquirer, UaaResponse};
use super::jwt::{self, JwtUserTokenInfo};
use super::refresh::RefreshGuards;
use super::LoginCredentials;
use crate::config::ConsoleConfig;
use crate::errors::AppError;
use crate::models::{AuthType, ConnectedUser, TokenKey, TokenRecord};
use crate::vault::CredentialStore;

/// Runs after every successful console login. Failures are logged, never fatal.
#[async_trait]
pub trait LoginHook: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    async fn on_login(&self, user: &JwtUserTokenInfo) -> anyhow::Result<()>;
}

pub struct ConsoleIdentity {
    config: ConsoleConfig,
    acquirer: Arc<TokenAcquirer>,
    credentials: Arc<CredentialStore>,
    refresh: RefreshGuards,
    hooks: RwLock<Vec<Arc<dyn LoginHook>>>,
}

impl ConsoleIdentity {
    pub fn new(
        config: ConsoleConfig,
        acquirer: Arc<TokenAcquirer>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            config,
            acquirer,
            credentials,
            refresh: RefreshGuards::new(),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    fn client(&self) -> ClientCredentials {
        ClientCredentials::new(&self.config.console_client, &self.config.console_client_secret)
    }

    async fn acquire(&self, grant: &Grant) -> Result<UaaResponse, AppError> {
        self.acquirer
            .acquire(
                grant,
                &self.client(),
                &self.config.token_url(),
                self.config.skip_ssl_validation,
            )
            .await
    }

    /// Exchanges login credentials for a UAA token and decodes its identity.
    /// Nothing is stored.
    pub async fn authenticate(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<(UaaResponse, JwtUserTokenInfo), AppError> {
        let grant = match credentials {
            LoginCredentials::Password { username, password } => {
                Grant::password(username, password)?
            }
            LoginCredentials::AuthorizationCode { code, state } => {
                Grant::authorization_code(code, state, None)?
            }
        };
        tracing::debug!(grant_type = grant.grant_type(), "console login");

        let res = self.acquire(&grant).await?;
        let info = jwt::decode(&res.access_token)?;
        Ok((res, info))
    }

    pub async fn save_token(
        &self,
        info: &JwtUserTokenInfo,
        res: &UaaResponse,
    ) -> Result<TokenRecord, AppError> {
        let record = TokenRecord::new(
            AuthType::OAuth2,
            &res.access_token,
            &res.refresh_token,
            Some(info.token_expiry),
        );
        self.credentials
            .save(&TokenKey::console(&info.user_guid), &record)
            .await?;
        Ok(record)
    }

    pub async fn token(&self, user_guid: &str) -> Result<Option<TokenRecord>, AppError> {
        self.credentials.find(&TokenKey::console(user_guid)).await
    }

    /// Refreshes the user's UAA token unconditionally.
    pub async fn refresh_console_token(&self, user_guid: &str) -> Result<TokenRecord, AppError> {
        let observed = self
            .token(user_guid)
            .await?
            .ok_or_else(|| AppError::SessionInvalid("Unable to find UAA Token".into()))?;
        self.refresh_observed(user_guid, &observed).await
    }

    /// Refreshes the token unless another request already replaced `observed`.
    pub(crate) async fn refresh_observed(
        &self,
        user_guid: &str,
        observed: &TokenRecord,
    ) -> Result<TokenRecord, AppError> {
        let key = TokenKey::console(user_guid);
        let _permit = self.refresh.lock(&key).await;

        let current = self
            .credentials
            .find(&key)
            .await?
            .ok_or_else(|| AppError::SessionInvalid("Unable to find UAA Token".into()))?;
        if RefreshGuards::superseded(observed, &current) {
            tracing::debug!(user = user_guid, "console token already refreshed");
            return Ok(current);
        }
        if current.refresh_token.is_empty() {
            return Err(AppError::SessionInvalid("UAA token cannot be refreshed".into()));
        }

        let res = self
            .acquire(&Grant::refresh(current.refresh_token.clone(), None))
            .await?;
        let info = jwt::decode(&res.access_token)?;
        if info.user_guid != user_guid {
            tracing::error!(user = user_guid, "refreshed UAA token belongs to another user");
            return Err(AppError::SessionInvalid("Could not refresh UAA token".into()));
        }

        // UAA does not always rotate refresh tokens.
        let refresh_token = if res.refresh_token.is_empty() {
            current.refresh_token
        } else {
            res.refresh_token
        };
        let record = TokenRecord::new(
            AuthType::OAuth2,
            res.access_token,
            refresh_token,
            Some(info.token_expiry),
        );
        self.credentials.save(&key, &record).await?;
        tracing::info!(user = user_guid, expiry = %info.token_expiry, "console token refreshed");
        Ok(record)
    }

    /// Password login on behalf of a user, e.g. for tooling. With `store` the new
    /// token replaces the user's stored one.
    pub async fn refresh_login(
        &self,
        username: &str,
        password: &str,
        store: bool,
    ) -> Result<UaaResponse, AppError> {
        let (res, info) = self
            .authenticate(&LoginCredentials::password(username, password))
            .await?;
        if store {
            self.save_token(&info, &res).await?;
        }
        Ok(res)
    }

    /// Identity and console admin flag derived from the stored UAA token.
    pub async fn user(&self, user_guid: &str) -> Result<ConnectedUser, AppError> {
        let token = self
            .token(user_guid)
            .await?
            .ok_or_else(|| AppError::SessionInvalid("Unable to find UAA Token".into()))?;
        let info = jwt::decode(&token.auth_token)?;
        Ok(ConnectedUser {
            admin: info.has_scope(&self.config.console_admin_scope),
            guid: info.user_guid,
            name: info.user_name,
            scopes: info.scope,
        })
    }

    pub async fn username(&self, user_guid: &str) -> Result<String, AppError> {
        Ok(self.user(user_guid).await?.name)
    }

    pub fn register_login_hook(&self, hook: Arc<dyn LoginHook>) {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks.push(hook);
        hooks.sort_by_key(|h| h.priority());
    }

    pub async fn run_login_hooks(&self, user: &JwtUserTokenInfo) {
        let hooks: Vec<Arc<dyn LoginHook>> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            if let Err(e) = hook.on_login(user).await {
                tracing::warn!(hook = hook.name(), user = %user.user_guid, "login hook failed: {:#}", e);
            }
        }
    }
}
