use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;

use crate::auth::LoginCredentials;
use crate::endpoint::ConnectRequest;
use crate::errors::AppError;
use crate::models::{AuthType, LoginResponse, LogoutResponse};
use crate::session::{Session, CLIENT_REQUEST_DATE_HEADER, SESSION_EXPIRES_ON_HEADER, XSRF_HEADER};
use crate::sso::CallbackParams;
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct StateQuery {
    pub state: Option<String>,
}

#[derive(Deserialize)]
pub struct EndpointSsoQuery {
    pub guid: Option<String>,
    pub state: Option<String>,
}

#[derive(Deserialize)]
pub struct ConnectForm {
    #[serde(default)]
    pub cnsi_guid: String,
    #[serde(default)]
    pub system_shared: String,
    /// Auth type tag; empty means OAuth2.
    #[serde(default)]
    pub connect_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct DisconnectForm {
    #[serde(default)]
    pub cnsi_guid: String,
}

// ── Console login ────────────────────────────────────────────

/// POST /auth/login/uaa — password login. Any session the browser already had is
/// replaced by a new one.
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let previous = state
        .sessions
        .load(state.cookie.read(&headers).as_deref())
        .await?;

    let (mut session, body) = state
        .sessions
        .login(&LoginCredentials::password(form.username, form.password))
        .await?;
    if !previous.is_new() {
        state.sessions.destroy(&previous).await?;
    }

    let xsrf = state.sessions.ensure_xsrf_token(&mut session).await?;
    let mut resp = Json(body).into_response();
    set_cookie(&state, &mut resp, &session);
    session_headers(&state, &mut resp, &session, &headers, &xsrf);
    Ok(resp)
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    end_session(&state, &headers).await?;
    let mut resp = Json(LogoutResponse {
        is_sso: state.sso.enabled(),
    })
    .into_response();
    clear_cookie(&state, &mut resp);
    Ok(resp)
}

// ── SSO ──────────────────────────────────────────────────────

/// GET /auth/sso_login
pub async fn sso_login(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StateQuery>,
) -> Result<Redirect, AppError> {
    let location = state.sso.initiate_login(q.state.as_deref())?;
    Ok(Redirect::temporary(&location))
}

/// GET /auth/sso_logout
pub async fn sso_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<StateQuery>,
) -> Result<Response, AppError> {
    let location = state.sso.initiate_logout(q.state.as_deref())?;
    end_session(&state, &headers).await?;
    let mut resp = Redirect::temporary(&location).into_response();
    clear_cookie(&state, &mut resp);
    Ok(resp)
}

/// GET /auth/sso_login_callback
pub async fn sso_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let current = state
        .sessions
        .load(state.cookie.read(&headers).as_deref())
        .await?;
    let redirect = state.sso.callback(params, current.user_guid()).await?;

    let mut resp = Redirect::temporary(&redirect.location).into_response();
    if let Some(mut session) = redirect.session {
        if !current.is_new() {
            if let Err(e) = state.sessions.destroy(&current).await {
                tracing::warn!("could not remove previous session: {}", e);
            }
        }
        let xsrf = state.sessions.ensure_xsrf_token(&mut session).await?;
        set_cookie(&state, &mut resp, &session);
        session_headers(&state, &mut resp, &session, &headers, &xsrf);
    }
    Ok(resp)
}

// ── Endpoints (session required) ─────────────────────────────

/// POST /auth/login/cnsi
pub async fn connect_endpoint(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<ConnectForm>,
) -> Result<Json<LoginResponse>, AppError> {
    if form.cnsi_guid.is_empty() {
        return Err(AppError::MissingParameter("cnsi_guid"));
    }
    let auth_type = AuthType::parse(&form.connect_type).ok_or_else(|| {
        AppError::ConnectFailed(format!("unknown connect type '{}'", form.connect_type))
    })?;

    let request = ConnectRequest {
        auth_type,
        credentials: LoginCredentials::password(form.username, form.password),
        system_shared: parse_bool(&form.system_shared),
    };
    let resp = state
        .connector
        .connect(session.user_guid(), &form.cnsi_guid, request)
        .await?;
    Ok(Json(resp))
}

/// GET /auth/login/cnsi — starts an SSO connect to the endpoint.
pub async fn sso_connect_endpoint(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EndpointSsoQuery>,
) -> Result<Redirect, AppError> {
    let guid = q
        .guid
        .filter(|g| !g.is_empty())
        .ok_or(AppError::MissingParameter("guid"))?;
    let location = state.sso.endpoint_login(&guid, q.state.as_deref()).await?;
    Ok(Redirect::temporary(&location))
}

/// POST /auth/logout/cnsi
pub async fn disconnect_endpoint(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Form(form): Form<DisconnectForm>,
) -> Result<StatusCode, AppError> {
    if form.cnsi_guid.is_empty() {
        return Err(AppError::MissingParameter("cnsi_guid"));
    }
    state
        .connector
        .disconnect(session.user_guid(), &form.cnsi_guid)
        .await?;
    Ok(StatusCode::OK)
}

/// GET /auth/session/verify
pub async fn verify_session(
    State(state): State<Arc<AppState>>,
    Extension(mut session): Extension<Session>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let body = state.sessions.verify_session(&mut session).await?;
    let xsrf = state.sessions.ensure_xsrf_token(&mut session).await?;
    let mut resp = Json(body).into_response();
    session_headers(&state, &mut resp, &session, &headers, &xsrf);
    Ok(resp)
}

// ── Helpers ──────────────────────────────────────────────────

async fn end_session(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let mut session = state
        .sessions
        .load(state.cookie.read(headers).as_deref())
        .await?;
    if !session.is_new() {
        state.sessions.logout(&mut session).await?;
    }
    Ok(())
}

fn set_cookie(state: &AppState, resp: &mut Response, session: &Session) {
    if let Some(cookie) = state.cookie.set(session.id()) {
        resp.headers_mut().append(header::SET_COOKIE, cookie);
    }
}

fn clear_cookie(state: &AppState, resp: &mut Response) {
    if let Some(cookie) = state.cookie.clear() {
        resp.headers_mut().append(header::SET_COOKIE, cookie);
    }
}

fn session_headers(
    state: &AppState,
    resp: &mut Response,
    session: &Session,
    request_headers: &HeaderMap,
    xsrf: &str,
) {
    let client_date = request_headers
        .get(CLIENT_REQUEST_DATE_HEADER)
        .and_then(|v| v.to_str().ok());
    let expires = state.sessions.expiry_header_value(session, client_date);

    let headers = resp.headers_mut();
    if let Ok(val) = HeaderValue::from_str(xsrf) {
        headers.insert(XSRF_HEADER, val);
    }
    if let Ok(val) = HeaderValue::from_str(&expires) {
        headers.insert(SESSION_EXPIRES_ON_HEADER, val);
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
