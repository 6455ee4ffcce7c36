//! Browser sessions bound to a console user.

pub mod manager;

pub use manager::SessionManager;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{Map, Value};

use crate::store::SessionRecord;

pub const SESSION_USER_KEY: &str = "user_id";
/// Expiry (unix seconds) of the UAA token the session was created or refreshed with.
pub const SESSION_TOKEN_EXPIRY_KEY: &str = "exp";
pub const SESSION_XSRF_KEY: &str = "xsrf_token";

pub const XSRF_HEADER: &str = "x-xsrf-token";
pub const SESSION_EXPIRES_ON_HEADER: &str = "x-cap-session-expires-on";
pub const CLIENT_REQUEST_DATE_HEADER: &str = "x-cap-request-date";

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    values: Map<String, Value>,
    expires_on: DateTime<Utc>,
    is_new: bool,
}

impl Session {
    /// Empty session with a new random id. Not persisted until saved.
    pub fn fresh() -> Self {
        Self {
            id: random_token(),
            values: Map::new(),
            expires_on: Utc::now(),
            is_new: true,
        }
    }

    pub(crate) fn from_record(id: &str, record: SessionRecord) -> Self {
        Self {
            id: id.to_string(),
            values: record.values,
            expires_on: record.expires_on,
            is_new: false,
        }
    }

    pub(crate) fn to_record(&self) -> SessionRecord {
        SessionRecord {
            values: self.values.clone(),
            expires_on: self.expires_on,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    pub(crate) fn set_expires_on(&mut self, at: DateTime<Utc>) {
        self.expires_on = at;
        self.is_new = false;
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn user_guid(&self) -> Option<&str> {
        self.get_str(SESSION_USER_KEY).filter(|s| !s.is_empty())
    }

    pub fn token_expiry(&self) -> Option<i64> {
        self.get_i64(SESSION_TOKEN_EXPIRY_KEY)
    }

    pub fn xsrf_token(&self) -> Option<&str> {
        self.get_str(SESSION_XSRF_KEY).filter(|s| !s.is_empty())
    }
}

/// 32 random bytes, URL-safe base64.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
