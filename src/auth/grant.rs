//! OAuth2 grant exchanges against an identity provider's token endpoint.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::errors::AppError;
use crate::http_client::HttpClientPool;

/// Route the identity provider sends the browser back to after an SSO login.
pub const SSO_CALLBACK_PATH: &str = "/pp/v1/auth/sso_login_callback";

/// The only detail a failed token exchange reveals to the user.
const ACCESS_DENIED: &str = "Access Denied";

/// OAuth client used to authenticate the grant request itself.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

pub enum Grant {
    AuthorizationCode { code: String, redirect_uri: String },
    Password { username: String, password: String },
    RefreshToken { refresh_token: String, scope: Option<String> },
}

impl Grant {
    /// `state` and `endpoint_guid` must be the ones used to start the flow; the
    /// provider rejects a redirect_uri that differs from the authorize request.
    pub fn authorization_code(
        code: &str,
        state: &str,
        endpoint_guid: Option<&str>,
    ) -> Result<Self, AppError> {
        if code.is_empty() {
            return Err(AppError::MissingParameter("code"));
        }
        if state.is_empty() {
            return Err(AppError::MissingState);
        }
        Ok(Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: sso_redirect_uri(state, state, endpoint_guid),
        })
    }

    pub fn password(username: &str, password: &str) -> Result<Self, AppError> {
        if username.is_empty() || password.is_empty() {
            return Err(AppError::InvalidCredentials);
        }
        Ok(Grant::Password {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn refresh(refresh_token: impl Into<String>, scope: Option<String>) -> Self {
        Grant::RefreshToken {
            refresh_token: refresh_token.into(),
            scope,
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::Password { .. } => "password",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    fn form(&self, client: &ClientCredentials) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", self.grant_type().to_string())];
        match self {
            Grant::AuthorizationCode { code, redirect_uri } => {
                form.push(("code", code.clone()));
                form.push(("client_id", client.client_id.clone()));
                form.push(("client_secret", client.client_secret.clone()));
                form.push(("redirect_uri", redirect_uri.clone()));
            }
            Grant::Password { username, password } => {
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
                form.push(("response_type", "token".to_string()));
            }
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                form.push(("refresh_token", refresh_token.clone()));
                form.push(("response_type", "token".to_string()));
                if let Some(scope) = scope.as_ref().filter(|s| !s.is_empty()) {
                    form.push(("scope", scope.clone()));
                }
            }
        }
        form
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct UaaResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub jti: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl UaaResponse {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    /// Expiry implied by `expires_in`, counted from `now`. `None` when the IdP sent
    /// no lifetime or one that does not fit a timestamp.
    pub fn expiry_from_expires_in(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.expires_in <= 0 {
            return None;
        }
        Duration::try_seconds(self.expires_in).and_then(|d| now.checked_add_signed(d))
    }
}

#[derive(Deserialize)]
struct UaaErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

pub struct TokenAcquirer {
    clients: Arc<HttpClientPool>,
}

impl TokenAcquirer {
    pub fn new(clients: Arc<HttpClientPool>) -> Self {
        Self { clients }
    }

    pub fn clients(&self) -> &HttpClientPool {
        &self.clients
    }

    pub async fn acquire(
        &self,
        grant: &Grant,
        client: &ClientCredentials,
        token_url: &str,
        skip_tls: bool,
    ) -> Result<UaaResponse, AppError> {
        tracing::debug!(grant_type = grant.grant_type(), token_url, "requesting token");

        // UAA expects the client credentials form-encoded inside the basic auth header.
        let resp = self
            .clients
            .for_method(&Method::POST, skip_tls)
            .post(token_url)
            .basic_auth(
                query_escape(&client.client_id),
                Some(query_escape(&client.client_secret)),
            )
            .header(ACCEPT, "application/json")
            .form(&grant.form(client))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(token_url, "token request failed: {}", e);
                AppError::UpstreamAuth {
                    status: StatusCode::UNAUTHORIZED,
                    message: ACCESS_DENIED.into(),
                    raw: e.to_string(),
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| AppError::UpstreamAuth {
            status: StatusCode::UNAUTHORIZED,
            message: ACCESS_DENIED.into(),
            raw: e.to_string(),
        })?;

        if status != reqwest::StatusCode::OK {
            tracing::warn!(
                token_url,
                status = status.as_u16(),
                grant_type = grant.grant_type(),
                "token request rejected"
            );
            return Err(AppError::UpstreamAuth {
                status: StatusCode::UNAUTHORIZED,
                message: describe_rejection(&body),
                raw: body,
            });
        }

        serde_json::from_str::<UaaResponse>(&body).map_err(|e| {
            tracing::warn!(token_url, "unparseable token response: {}", e);
            AppError::UpstreamAuth {
                status: StatusCode::UNAUTHORIZED,
                message: ACCESS_DENIED.into(),
                raw: body.clone(),
            }
        })
    }
}

fn describe_rejection(body: &str) -> String {
    match serde_json::from_str::<UaaErrorResponse>(body) {
        Ok(e) if !e.error_description.is_empty() => e.error_description,
        Ok(e) if e.error == "invalid_grant" => "Invalid credentials".to_string(),
        _ => ACCESS_DENIED.to_string(),
    }
}

/// Callback URL registered for the SSO flow started from `base`. Only the origin of
/// `base` is kept; a `base` that is not an absolute URL yields a relative callback.
pub fn sso_redirect_uri(base: &str, state: &str, endpoint_guid: Option<&str>) -> String {
    let origin = match Url::parse(base) {
        Ok(mut url) => {
            url.set_path("");
            url.set_query(None);
            url.set_fragment(None);
            url.as_str()
                .trim_end_matches('?')
                .trim_end_matches('/')
                .to_string()
        }
        Err(_) => String::new(),
    };

    let mut uri = format!("{}{}?state={}", origin, SSO_CALLBACK_PATH, query_escape(state));
    if let Some(guid) = endpoint_guid.filter(|g| !g.is_empty()) {
        uri.push_str("&guid=");
        uri.push_str(&query_escape(guid));
    }
    uri
}

/// application/x-www-form-urlencoded escaping (space becomes '+').
pub fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpClientConfig;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn acquirer() -> TokenAcquirer {
        let cfg = HttpClientConfig {
            read_retries: 0,
            ..Default::default()
        };
        TokenAcquirer::new(Arc::new(HttpClientPool::new(&cfg).unwrap()))
    }

    #[test]
    fn test_redirect_uri_keeps_origin_only() {
        let state = "https://console.example.com/login?x=1";
        assert_eq!(
            sso_redirect_uri(state, state, None),
            "https://console.example.com/pp/v1/auth/sso_login_callback?state=https%3A%2F%2Fconsole.example.com%2Flogin%3Fx%3D1"
        );
        assert_eq!(
            sso_redirect_uri("https://console.example.com:8443/", "logout", Some("e1")),
            "https://console.example.com:8443/pp/v1/auth/sso_login_callback?state=logout&guid=e1"
        );
    }

    #[test]
    fn test_redirect_uri_with_relative_base() {
        assert_eq!(
            sso_redirect_uri("logout", "logout", None),
            "/pp/v1/auth/sso_login_callback?state=logout"
        );
    }

    #[test]
    fn test_password_grant_requires_both_fields() {
        assert!(matches!(Grant::password("alice", ""), Err(AppError::InvalidCredentials)));
        assert!(matches!(Grant::password("", "pw"), Err(AppError::InvalidCredentials)));
        assert!(matches!(
            Grant::authorization_code("", "https://c", None),
            Err(AppError::MissingParameter("code"))
        ));
        assert!(matches!(
            Grant::authorization_code("abc", "", None),
            Err(AppError::MissingState)
        ));
    }

    #[test]
    fn test_refresh_form_only_sends_scope_when_narrowed() {
        let client = ClientCredentials::new("cf", "");
        let form = Grant::refresh("r-1", None).form(&client);
        assert!(!form.iter().any(|(k, _)| *k == "scope"));
        let form = Grant::refresh("r-1", Some("openid".into())).form(&client);
        assert!(form.contains(&("scope", "openid".to_string())));
        assert!(form.contains(&("response_type", "token".to_string())));
    }

    #[tokio::test]
    async fn test_password_grant_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("authorization", "Basic Y2Y6"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a.b.c",
                "refresh_token": "r-1",
                "token_type": "bearer",
                "expires_in": 599,
                "scope": "openid stratos.admin"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let res = acquirer()
            .acquire(
                &Grant::password("alice", "pw").unwrap(),
                &ClientCredentials::new("cf", ""),
                &format!("{}/oauth/token", server.uri()),
                false,
            )
            .await
            .unwrap();
        assert_eq!(res.access_token, "a.b.c");
        assert_eq!(res.scopes(), vec!["openid", "stratos.admin"]);
    }

    #[tokio::test]
    async fn test_rejection_carries_raw_body() {
        let server = MockServer::start().await;
        let body = r#"{"error":"unauthorized","error_description":"Bad credentials"}"#;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let err = acquirer()
            .acquire(
                &Grant::password("alice", "wrong").unwrap(),
                &ClientCredentials::new("cf", ""),
                &format!("{}/oauth/token", server.uri()),
                false,
            )
            .await
            .unwrap_err();
        match err {
            AppError::UpstreamAuth {
                status,
                message,
                raw,
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Bad credentials");
                assert_eq!(raw, body);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    fn response(expires_in: i64) -> UaaResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": "opaque",
            "expires_in": expires_in,
        }))
        .unwrap()
    }

    #[test]
    fn test_expiry_from_expires_in_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        assert_eq!(
            response(600).expiry_from_expires_in(now),
            Some(now + Duration::seconds(600))
        );
        assert_eq!(response(0).expiry_from_expires_in(now), None);
        assert_eq!(response(-5).expiry_from_expires_in(now), None);
        assert_eq!(response(9_000_000_000_000_000_000).expiry_from_expires_in(now), None);
        assert_eq!(response(i64::MAX).expiry_from_expires_in(now), None);
    }

    fn assert_access_denied(err: AppError) {
        match err {
            AppError::UpstreamAuth {
                status, message, ..
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Access Denied");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_access_denied() {
        // Bind then drop a listener so the port is known to be closed.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = acquirer()
            .acquire(
                &Grant::password("alice", "pw").unwrap(),
                &ClientCredentials::new("cf", ""),
                &format!("http://127.0.0.1:{}/oauth/token", port),
                false,
            )
            .await
            .unwrap_err();
        assert_access_denied(err);
    }

    #[tokio::test]
    async fn test_unparseable_success_is_access_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = acquirer()
            .acquire(
                &Grant::password("alice", "pw").unwrap(),
                &ClientCredentials::new("cf", ""),
                &format!("{}/oauth/token", server.uri()),
                false,
            )
            .await
            .unwrap_err();
        match &err {
            AppError::UpstreamAuth { raw, .. } => assert_eq!(raw, "<html>login</html>"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_access_denied(err);
    }
}
