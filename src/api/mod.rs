use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::session::{Session, CLIENT_REQUEST_DATE_HEADER, SESSION_EXPIRES_ON_HEADER, XSRF_HEADER};
use crate::AppState;

pub mod cookie;
pub mod handlers;

/// The whole HTTP surface: health check, the auth API under `/pp/v1`, and the
/// layers every response passes through.
pub fn app(state: Arc<AppState>, allowed_origins: Vec<String>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/pp/v1", api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Auth API router. Routes are relative; the caller mounts this under `/pp/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let session_routes = Router::new()
        .route(
            "/auth/login/cnsi",
            get(handlers::sso_connect_endpoint).post(handlers::connect_endpoint),
        )
        .route("/auth/logout/cnsi", post(handlers::disconnect_endpoint))
        .route("/auth/session/verify", get(handlers::verify_session))
        .route_layer(middleware::from_fn(xsrf_guard))
        .route_layer(middleware::from_fn_with_state(state, require_session));

    Router::new()
        .route("/auth/login/uaa", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/sso_login", get(handlers::sso_login))
        .route("/auth/sso_logout", get(handlers::sso_logout))
        .route("/auth/sso_login_callback", get(handlers::sso_callback))
        .merge(session_routes)
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: loads the caller's session and rejects requests without a logged-in
/// user. The session's expiry slides forward on every request.
async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let id = state.cookie.read(req.headers());
    let mut session = state.sessions.load(id.as_deref()).await?;
    if session.is_new() || session.user_guid().is_none() {
        return Err(AppError::Unauthenticated);
    }
    state.sessions.save(&mut session).await?;

    let client_date = req
        .headers()
        .get(CLIENT_REQUEST_DATE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let expires = state
        .sessions
        .expiry_header_value(&session, client_date.as_deref());

    req.extensions_mut().insert(session);
    let mut resp = next.run(req).await;
    if !resp.headers().contains_key(SESSION_EXPIRES_ON_HEADER) {
        if let Ok(val) = HeaderValue::from_str(&expires) {
            resp.headers_mut().insert(SESSION_EXPIRES_ON_HEADER, val);
        }
    }
    Ok(resp)
}

/// Middleware: state-changing requests must echo the session's XSRF token.
async fn xsrf_guard(req: Request, next: Next) -> Result<Response, AppError> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(req).await);
    }

    let matches = {
        let expected = req
            .extensions()
            .get::<Session>()
            .and_then(|s| s.xsrf_token());
        let provided = req
            .headers()
            .get(XSRF_HEADER)
            .and_then(|v| v.to_str().ok());
        match (expected, provided) {
            (Some(e), Some(p)) => bool::from(e.as_bytes().ct_eq(p.as_bytes())),
            _ => false,
        }
    };

    if !matches {
        tracing::warn!(method = %req.method(), uri = %req.uri(), "XSRF token mismatch");
        return Err(AppError::XsrfMismatch);
    }
    Ok(next.run(req).await)
}

fn cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            allowed_origins.iter().any(|o| o == origin)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        // AllowHeaders::any() is not allowed together with credentials.
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(XSRF_HEADER),
            HeaderName::from_static(CLIENT_REQUEST_DATE_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(XSRF_HEADER),
            HeaderName::from_static(SESSION_EXPIRES_ON_HEADER),
        ])
        .allow_credentials(true)
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");

    resp
}
