//! Browser redirect flows for single sign-on. Login, logout and endpoint connect
//! all come back through one callback URL; the query decides which flow it was.

use std::sync::Arc;

use serde::Deserialize;

use crate::auth::grant::{query_escape, sso_redirect_uri};
use crate::auth::LoginCredentials;
use crate::config::{ConsoleConfig, SsoConfig};
use crate::endpoint::{ConnectRequest, EndpointConnector};
use crate::errors::AppError;
use crate::models::AuthType;
use crate::session::manager::SessionManager;
use crate::session::Session;

pub const LOGOUT_STATE: &str = "logout";
pub const LOGGED_OUT_LOCATION: &str = "/login?SSO_Message=You+have+been+logged+out";

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub guid: Option<String>,
}

/// Where to send the browser, plus the new session when the callback logged
/// someone in.
#[derive(Debug)]
pub struct SsoRedirect {
    pub location: String,
    pub session: Option<Session>,
}

impl SsoRedirect {
    fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            session: None,
        }
    }
}

pub struct SsoCoordinator {
    sso: SsoConfig,
    console: ConsoleConfig,
    sessions: Arc<SessionManager>,
    connector: Arc<EndpointConnector>,
}

impl SsoCoordinator {
    pub fn new(
        sso: SsoConfig,
        console: ConsoleConfig,
        sessions: Arc<SessionManager>,
        connector: Arc<EndpointConnector>,
    ) -> Self {
        Self {
            sso,
            console,
            sessions,
            connector,
        }
    }

    pub fn enabled(&self) -> bool {
        self.sso.enabled
    }

    fn require_enabled(&self) -> Result<(), AppError> {
        if self.sso.enabled {
            Ok(())
        } else {
            Err(AppError::SsoDisabled)
        }
    }

    /// Redirect to the console UAA's authorize page.
    pub fn initiate_login(&self, state: Option<&str>) -> Result<String, AppError> {
        self.require_enabled()?;
        let state = required_state(state)?;
        tracing::debug!("starting SSO console login");
        Ok(format!(
            "{}/oauth/authorize?response_type=code&client_id={}&redirect_uri={}",
            self.console.uaa_endpoint.trim_end_matches('/'),
            query_escape(&self.console.console_client),
            query_escape(&sso_redirect_uri(state, state, None)),
        ))
    }

    /// Redirect after the local session is gone: through the UAA logout page when
    /// the `logout` option is set, else straight to the login page.
    pub fn initiate_logout(&self, state: Option<&str>) -> Result<String, AppError> {
        self.require_enabled()?;
        let state = required_state(state)?;
        if !self.sso.has_option("logout") {
            return Ok(LOGGED_OUT_LOCATION.to_string());
        }
        Ok(format!(
            "{}/logout.do?client_id={}&redirect={}",
            self.console.uaa_endpoint.trim_end_matches('/'),
            query_escape(&self.console.console_client),
            query_escape(&sso_redirect_uri(state, LOGOUT_STATE, None)),
        ))
    }

    /// Redirect to the endpoint's authorize page; the callback carries the guid.
    pub async fn endpoint_login(
        &self,
        endpoint_guid: &str,
        state: Option<&str>,
    ) -> Result<String, AppError> {
        let state = required_state(state)?;
        let endpoint = self.connector.endpoint(endpoint_guid).await?;
        tracing::debug!(endpoint = %endpoint.guid, "starting SSO endpoint connect");
        Ok(format!(
            "{}?response_type=code&client_id={}&redirect_uri={}",
            endpoint.authorize_url(),
            query_escape(&endpoint.client_id),
            query_escape(&sso_redirect_uri(state, state, Some(&endpoint.guid))),
        ))
    }

    /// Handles the identity provider's redirect back to us. Only a missing `state`
    /// is an error; every other outcome is a redirect.
    pub async fn callback(
        &self,
        params: CallbackParams,
        user_guid: Option<&str>,
    ) -> Result<SsoRedirect, AppError> {
        let state = required_state(params.state.as_deref())?.to_string();
        let code = params.code.unwrap_or_default();

        if let Some(guid) = params.guid.filter(|g| !g.is_empty()) {
            if code.is_empty() {
                return Ok(SsoRedirect::to(
                    self.endpoint_login(&guid, Some(&state)).await?,
                ));
            }
            return Ok(SsoRedirect::to(
                self.complete_endpoint_login(&guid, &code, &state, user_guid)
                    .await,
            ));
        }

        if state == LOGOUT_STATE {
            return Ok(SsoRedirect::to(LOGGED_OUT_LOCATION));
        }

        match self
            .sessions
            .login(&LoginCredentials::authorization_code(code, &state))
            .await
        {
            Ok((session, _)) => Ok(SsoRedirect {
                location: state,
                session: Some(session),
            }),
            Err(e) => {
                tracing::warn!("SSO console login failed: {}", e);
                Ok(SsoRedirect::to(format!(
                    "{}/login?SSO_Message={}",
                    state,
                    query_escape(&e.user_message())
                )))
            }
        }
    }

    async fn complete_endpoint_login(
        &self,
        guid: &str,
        code: &str,
        state: &str,
        user_guid: Option<&str>,
    ) -> String {
        let request = ConnectRequest {
            auth_type: AuthType::OAuth2,
            credentials: LoginCredentials::authorization_code(code, state),
            system_shared: false,
        };
        let status = match self.connector.connect(user_guid, guid, request).await {
            Ok(_) => "ok",
            Err(e) => {
                tracing::warn!(endpoint = guid, "SSO endpoint connect failed: {}", e);
                "fail"
            }
        };
        format!("/endpoints?cnsi_guid={}&status={}", query_escape(guid), status)
    }
}

fn required_state(state: Option<&str>) -> Result<&str, AppError> {
    state.filter(|s| !s.is_empty()).ok_or(AppError::MissingState)
}
