//! Authentication strategies for endpoint connections, keyed by auth type.
//!
//! A provider may implement any subset of `connect`, `validate` and `user_info`;
//! whatever it leaves out is served by the OAuth2 implementation.

use std::collections::HashMap;

use axum::http::StatusCode;
use base64::Engine;
use chrono::Utc;
use futures::future::BoxFuture;

use super::grant::{ClientCredentials, Grant, TokenAcquirer, UaaResponse};
use super::jwt;
use super::LoginCredentials;
use crate::errors::AppError;
use crate::models::{AuthType, ConnectedUser, EndpointRecord, TokenRecord};

pub type ConnectFn = for<'a> fn(
    &'a TokenAcquirer,
    &'a EndpointRecord,
    &'a LoginCredentials,
) -> BoxFuture<'a, Result<TokenRecord, AppError>>;

/// Local sanity check of a freshly issued credential.
pub type ValidateFn = fn(&EndpointRecord, &TokenRecord) -> Result<(), AppError>;

/// Identity behind a credential. `admin_scope` is the endpoint type's admin scope.
pub type UserInfoFn = fn(&TokenRecord, Option<&str>) -> Option<ConnectedUser>;

#[derive(Clone, Copy, Default)]
pub struct AuthProvider {
    pub connect: Option<ConnectFn>,
    pub validate: Option<ValidateFn>,
    pub user_info: Option<UserInfoFn>,
}

/// A provider with every gap filled in.
#[derive(Clone, Copy)]
pub struct ResolvedProvider {
    pub auth_type: AuthType,
    pub connect: ConnectFn,
    pub validate: ValidateFn,
    pub user_info: UserInfoFn,
}

pub struct AuthProviderRegistry {
    providers: HashMap<AuthType, AuthProvider>,
}

impl Default for AuthProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl AuthProviderRegistry {
    /// OAuth2 only.
    pub fn new() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            AuthType::OAuth2,
            AuthProvider {
                connect: Some(oauth2_connect),
                validate: Some(oauth2_validate),
                user_info: Some(oauth2_user_info),
            },
        );
        Self { providers }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            AuthType::HttpBasic,
            AuthProvider {
                connect: Some(http_basic_connect),
                validate: Some(http_basic_validate),
                user_info: Some(http_basic_user_info),
            },
        );
        registry.register(
            AuthType::Oidc,
            AuthProvider {
                connect: Some(oidc_connect),
                validate: Some(oidc_validate),
                user_info: None,
            },
        );
        registry
    }

    pub fn register(&mut self, auth_type: AuthType, provider: AuthProvider) {
        tracing::debug!(auth_type = %auth_type, "registering auth provider");
        self.providers.insert(auth_type, provider);
    }

    pub fn is_registered(&self, auth_type: AuthType) -> bool {
        self.providers.contains_key(&auth_type)
    }

    pub fn lookup(&self, auth_type: AuthType) -> ResolvedProvider {
        let base = self
            .providers
            .get(&AuthType::OAuth2)
            .copied()
            .unwrap_or_default();
        let own = self.providers.get(&auth_type).copied().unwrap_or_default();

        ResolvedProvider {
            auth_type,
            connect: own.connect.or(base.connect).unwrap_or(oauth2_connect),
            validate: own.validate.or(base.validate).unwrap_or(oauth2_validate),
            user_info: own.user_info.or(base.user_info).unwrap_or(oauth2_user_info),
        }
    }
}

// ── OAuth2 ───────────────────────────────────────────────────

fn oauth2_connect<'a>(
    acquirer: &'a TokenAcquirer,
    endpoint: &'a EndpointRecord,
    credentials: &'a LoginCredentials,
) -> BoxFuture<'a, Result<TokenRecord, AppError>> {
    Box::pin(async move {
        let res = exchange(acquirer, endpoint, credentials).await?;
        let info = jwt::decode(&res.access_token).map_err(|e| {
            tracing::warn!(endpoint = %endpoint.guid, "endpoint issued an undecodable token: {}", e);
            AppError::ConnectFailed("could not read the token issued by the endpoint".into())
        })?;
        Ok(TokenRecord::new(
            AuthType::OAuth2,
            res.access_token,
            res.refresh_token,
            Some(info.token_expiry),
        ))
    })
}

fn oauth2_validate(_endpoint: &EndpointRecord, token: &TokenRecord) -> Result<(), AppError> {
    let info = jwt::decode(&token.auth_token)
        .map_err(|_| AppError::ValidationFailed("token is not a valid access token".into()))?;
    if info.token_expiry <= Utc::now() {
        return Err(AppError::ValidationFailed("token has already expired".into()));
    }
    Ok(())
}

fn oauth2_user_info(token: &TokenRecord, admin_scope: Option<&str>) -> Option<ConnectedUser> {
    let info = jwt::decode(&token.auth_token).ok()?;
    let admin = admin_scope.is_some_and(|scope| info.has_scope(scope));
    Some(ConnectedUser {
        guid: info.user_guid,
        name: info.user_name,
        admin,
        scopes: info.scope,
    })
}

/// Runs the grant selected by `credentials` against the endpoint's token URL.
pub(crate) async fn exchange(
    acquirer: &TokenAcquirer,
    endpoint: &EndpointRecord,
    credentials: &LoginCredentials,
) -> Result<UaaResponse, AppError> {
    let grant = match credentials {
        LoginCredentials::Password { username, password } => Grant::password(username, password)?,
        LoginCredentials::AuthorizationCode { code, state } => {
            Grant::authorization_code(code, state, Some(&endpoint.guid))?
        }
    };
    let client = ClientCredentials::new(&endpoint.client_id, &endpoint.client_secret);

    acquirer
        .acquire(
            &grant,
            &client,
            &endpoint.token_url(),
            endpoint.skip_ssl_validation,
        )
        .await
        .map_err(|e| match e {
            AppError::UpstreamAuth {
                message, raw, ..
            } => AppError::UpstreamAuth {
                status: StatusCode::BAD_REQUEST,
                message: format!("Could not connect to the endpoint: {}", message),
                raw,
            },
            other => other,
        })
}

// ── HTTP Basic ───────────────────────────────────────────────

fn http_basic_connect<'a>(
    _acquirer: &'a TokenAcquirer,
    _endpoint: &'a EndpointRecord,
    credentials: &'a LoginCredentials,
) -> BoxFuture<'a, Result<TokenRecord, AppError>> {
    Box::pin(async move {
        let LoginCredentials::Password { username, password } = credentials else {
            return Err(AppError::InvalidCredentials);
        };
        if username.is_empty() || password.is_empty() {
            return Err(AppError::InvalidCredentials);
        }
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, password));
        // The refresh token slot carries the username; basic credentials never expire.
        Ok(TokenRecord::new(
            AuthType::HttpBasic,
            format!("Basic {}", encoded),
            username.clone(),
            None,
        ))
    })
}

fn http_basic_validate(_endpoint: &EndpointRecord, token: &TokenRecord) -> Result<(), AppError> {
    match token.auth_token.strip_prefix("Basic ") {
        Some(creds) if !creds.is_empty() => Ok(()),
        _ => Err(AppError::ValidationFailed("not a basic credential".into())),
    }
}

fn http_basic_user_info(token: &TokenRecord, _admin_scope: Option<&str>) -> Option<ConnectedUser> {
    if token.refresh_token.is_empty() {
        return None;
    }
    Some(ConnectedUser {
        guid: token.refresh_token.clone(),
        name: token.refresh_token.clone(),
        admin: false,
        scopes: Vec::new(),
    })
}

// ── OIDC ─────────────────────────────────────────────────────

/// Like OAuth2, but the access token may be opaque; expiry then comes from
/// `expires_in`.
fn oidc_connect<'a>(
    acquirer: &'a TokenAcquirer,
    endpoint: &'a EndpointRecord,
    credentials: &'a LoginCredentials,
) -> BoxFuture<'a, Result<TokenRecord, AppError>> {
    Box::pin(async move {
        let res = exchange(acquirer, endpoint, credentials).await?;
        let expiry = match jwt::decode(&res.access_token) {
            Ok(info) => info.token_expiry,
            Err(_) => res.expiry_from_expires_in(Utc::now()).ok_or_else(|| {
                AppError::ConnectFailed("token response carries no usable expiry".into())
            })?,
        };
        Ok(TokenRecord::new(
            AuthType::Oidc,
            res.access_token,
            res.refresh_token,
            Some(expiry),
        ))
    })
}

fn oidc_validate(_endpoint: &EndpointRecord, token: &TokenRecord) -> Result<(), AppError> {
    if token.auth_token.is_empty() || token.is_expired_at(Utc::now()) {
        return Err(AppError::ValidationFailed("token is not usable".into()));
    }
    Ok(())
}
