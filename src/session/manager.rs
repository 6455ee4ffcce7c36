use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{Session, SESSION_TOKEN_EXPIRY_KEY, SESSION_USER_KEY, SESSION_XSRF_KEY};
use crate::auth::jwt::has_scope;
use crate::auth::{ConsoleIdentity, LoginCredentials};
use crate::errors::AppError;
use crate::models::{ConnectedUser, LoginResponse};
use crate::store::SessionStore;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    console: Arc<ConsoleIdentity>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, console: Arc<ConsoleIdentity>, ttl: Duration) -> Self {
        Self {
            store,
            console,
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn console(&self) -> &Arc<ConsoleIdentity> {
        &self.console
    }

    /// The stored session for `id`, or a fresh one when it is unknown or expired.
    pub async fn load(&self, id: Option<&str>) -> Result<Session, AppError> {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if let Some(record) = self.store.load(id).await? {
                if record.expires_on > Utc::now() {
                    return Ok(Session::from_record(id, record));
                }
                self.store.delete(id).await?;
            }
        }
        Ok(Session::fresh())
    }

    /// Persists the session and slides its expiry forward.
    pub async fn save(&self, session: &mut Session) -> Result<(), AppError> {
        session.set_expires_on(Utc::now() + self.ttl);
        self.store.save(session.id(), &session.to_record()).await?;
        Ok(())
    }

    pub async fn destroy(&self, session: &Session) -> Result<(), AppError> {
        self.store.delete(session.id()).await?;
        Ok(())
    }

    /// Always starts from a new session id; nothing from an earlier session carries over.
    pub async fn create_session(
        &self,
        user_guid: &str,
        token_expiry: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let mut session = Session::fresh();
        session.set(SESSION_USER_KEY, user_guid);
        session.set(SESSION_TOKEN_EXPIRY_KEY, token_expiry.timestamp());
        self.save(&mut session).await?;
        tracing::info!(user = user_guid, "session created");
        Ok(session)
    }

    /// Console login. The UAA token is stored before the session that points at it.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<(Session, LoginResponse), AppError> {
        let (res, info) = self.console.authenticate(credentials).await?;
        self.console.save_token(&info, &res).await?;
        let session = self.create_session(&info.user_guid, info.token_expiry).await?;

        self.console.run_login_hooks(&info).await;

        let scopes = if res.scope.is_empty() {
            info.scope.clone()
        } else {
            res.scopes()
        };
        let admin = has_scope(&scopes, &self.console.config().console_admin_scope);
        let user = ConnectedUser {
            guid: info.user_guid,
            name: info.user_name.clone(),
            admin,
            scopes,
        };

        Ok((
            session,
            LoginResponse {
                account: info.user_name,
                token_expiry: info.token_expiry.timestamp(),
                api_endpoint: None,
                admin,
                user: Some(user),
            },
        ))
    }

    /// Checks the session still maps to a usable UAA token, refreshing it once if
    /// it expired, and extends the session.
    pub async fn verify_session(&self, session: &mut Session) -> Result<LoginResponse, AppError> {
        let exp = session
            .token_expiry()
            .ok_or_else(|| AppError::SessionInvalid("Could not find session date".into()))?;
        let user_guid = session
            .user_guid()
            .map(String::from)
            .ok_or_else(|| AppError::SessionInvalid("Could not find user_id in Session".into()))?;

        let token = self
            .console
            .token(&user_guid)
            .await?
            .ok_or_else(|| AppError::SessionInvalid("Unable to find UAA Token".into()))?;

        let now = Utc::now();
        if now.timestamp() > exp {
            tracing::debug!(user = %user_guid, "UAA token expired, refreshing");
            let refreshed = self
                .console
                .refresh_observed(&user_guid, &token)
                .await
                .map_err(|e| {
                    tracing::warn!(user = %user_guid, "could not refresh UAA token: {}", e);
                    AppError::SessionInvalid("Could not refresh UAA token".into())
                })?;
            let new_exp = refreshed
                .token_expiry
                .filter(|t| *t > now)
                .ok_or_else(|| AppError::SessionInvalid("Could not refresh UAA token".into()))?;

            session.set(SESSION_USER_KEY, user_guid.as_str());
            session.set(SESSION_TOKEN_EXPIRY_KEY, new_exp.timestamp());
        }
        self.save(session).await?;

        let user = self.console.user(&user_guid).await?;
        Ok(LoginResponse {
            account: user.name.clone(),
            token_expiry: session.token_expiry().unwrap_or(exp),
            api_endpoint: None,
            admin: user.admin,
            user: Some(user),
        })
    }

    /// Returns the session's XSRF token, creating and persisting one if absent.
    pub async fn ensure_xsrf_token(&self, session: &mut Session) -> Result<String, AppError> {
        if let Some(token) = session.xsrf_token() {
            return Ok(token.to_string());
        }
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::STANDARD.encode(bytes);
        session.set(SESSION_XSRF_KEY, token.as_str());
        self.save(session).await?;
        Ok(token)
    }

    /// Value for the session-expiry header, in unix seconds. Expressed on the
    /// client's clock when the client sent its current time.
    pub fn expiry_header_value(&self, session: &Session, client_date: Option<&str>) -> String {
        expiry_on_client_clock(session.expires_on().timestamp(), Utc::now().timestamp(), client_date)
            .to_string()
    }

    pub async fn logout(&self, session: &mut Session) -> Result<(), AppError> {
        if let Some(user) = session.user_guid() {
            tracing::info!(user, "logging out");
        }
        session.remove(SESSION_XSRF_KEY);
        session.remove(SESSION_USER_KEY);
        self.destroy(session).await
    }
}

/// Shifts `expires_on` onto the client's clock. Falls back to server time when the
/// client date is missing, unparseable or would overflow.
fn expiry_on_client_clock(expires_on: i64, now: i64, client_date: Option<&str>) -> i64 {
    client_date
        .and_then(|d| d.trim().parse::<i64>().ok())
        .and_then(|client_now| {
            expires_on
                .checked_sub(now)
                .and_then(|remaining| client_now.checked_add(remaining))
        })
        .unwrap_or(expires_on)
}
