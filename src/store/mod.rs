//! Persistence contracts. The auth core talks to these traits only; `PgStore` and
//! `MemoryStore` are the two implementations shipped with the crate.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{AuthType, EndpointRecord, TokenKey};

/// A token row as persisted. `auth_token` and `refresh_token` hold encrypted
/// payloads, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub auth_token: String,
    pub refresh_token: String,
    pub token_expiry: Option<DateTime<Utc>>,
    pub auth_type: AuthType,
    pub disconnected: bool,
    pub linked_guid: Option<String>,
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert or overwrite the row for `key`.
    async fn upsert(&self, key: &TokenKey, token: StoredToken) -> anyhow::Result<()>;
    async fn fetch(&self, key: &TokenKey) -> anyhow::Result<Option<StoredToken>>;
    /// Returns whether a row was removed.
    async fn remove(&self, key: &TokenKey) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn find(&self, guid: &str) -> anyhow::Result<Option<EndpointRecord>>;
    async fn list(&self) -> anyhow::Result<Vec<EndpointRecord>>;
    async fn save(&self, endpoint: &EndpointRecord) -> anyhow::Result<()>;
    async fn set_sso_allowed(&self, guid: &str, allowed: bool) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub values: Map<String, Value>,
    pub expires_on: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> anyhow::Result<Option<SessionRecord>>;
    async fn save(&self, id: &str, record: &SessionRecord) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    /// Drops expired sessions, returning how many were removed.
    async fn cleanup(&self) -> anyhow::Result<u64>;
    async fn close(&self);
}
