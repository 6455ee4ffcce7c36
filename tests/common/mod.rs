//! Shared fixtures: in-memory stores, a stub UAA, and JWT minting.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jetstream::auth::LoginCredentials;
use jetstream::config::Config;
use jetstream::models::EndpointRecord;
use jetstream::session::Session;
use jetstream::store::memory::MemoryStore;
use jetstream::store::EndpointRepository;
use jetstream::vault::CredentialStore;
use jetstream::AppState;

pub const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const CONSOLE_STATE: &str = "https://console.example.com";

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub uaa: MockServer,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let uaa = MockServer::start().await;
        let mut config = Config::default();
        config.encryption_key = KEY.to_string();
        config.console.uaa_endpoint = uaa.uri();
        config.http.read_retries = 0;
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone(), store.clone(), store.clone())
            .expect("app state");
        Self {
            state: Arc::new(state),
            store,
            uaa,
        }
    }

    /// Direct access to the token store the app uses, for seeding records.
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(KEY, self.store.clone()).expect("credential store")
    }

    pub async fn add_endpoint(&self, endpoint: EndpointRecord) {
        EndpointRepository::save(self.store.as_ref(), &endpoint)
            .await
            .expect("save endpoint");
    }

    /// Stubs a password grant for `username` and logs them in.
    pub async fn login(&self, username: &str, scopes: &[&str]) -> Session {
        let guid = user_guid(username);
        let access = jwt(&guid, username, scopes, Utc::now().timestamp() + 600);
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains(format!("username={}", username)))
            .respond_with(token_response(
                &access,
                &format!("refresh-{}", username),
                &scopes.join(" "),
            ))
            .mount(&self.uaa)
            .await;

        let (session, _) = self
            .state
            .sessions
            .login(&LoginCredentials::password(username, "pw"))
            .await
            .expect("login");
        session
    }
}

pub fn user_guid(username: &str) -> String {
    format!("u-{}", username)
}

/// Access token fixture. Signatures are never checked by the app.
pub fn jwt(user_id: &str, user_name: &str, scopes: &[&str], exp: i64) -> String {
    let claims = json!({
        "user_id": user_id,
        "user_name": user_name,
        "scope": scopes,
        "exp": exp,
        "iss": "https://uaa.example.com/oauth/token",
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"fixture"),
    )
    .expect("encode jwt")
}

pub fn token_response(access_token: &str, refresh_token: &str, scope: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "refresh_token": refresh_token,
        "expires_in": 599,
        "scope": scope,
        "jti": "jti-1",
    }))
}

pub fn endpoint(guid: &str, cnsi_type: &str, api: &str, auth: &str) -> EndpointRecord {
    EndpointRecord {
        guid: guid.into(),
        name: format!("{}-name", guid),
        cnsi_type: cnsi_type.into(),
        api_endpoint: api.into(),
        authorization_endpoint: auth.into(),
        token_endpoint: String::new(),
        client_id: "endpoint-client".into(),
        client_secret: String::new(),
        skip_ssl_validation: false,
        sso_allowed: false,
    }
}
