use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{EndpointRepository, SessionRecord, SessionStore, StoredToken, TokenRepository};
use crate::models::{EndpointRecord, TokenKey};

/// Process-local store backing all three repositories. Used by the test-suite and
/// for single-node deployments without a database.
#[derive(Default)]
pub struct MemoryStore {
    tokens: DashMap<TokenKey, StoredToken>,
    endpoints: DashMap<String, EndpointRecord>,
    sessions: DashMap<String, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn upsert(&self, key: &TokenKey, token: StoredToken) -> anyhow::Result<()> {
        self.tokens.insert(key.clone(), token);
        Ok(())
    }

    async fn fetch(&self, key: &TokenKey) -> anyhow::Result<Option<StoredToken>> {
        Ok(self.tokens.get(key).map(|t| t.value().clone()))
    }

    async fn remove(&self, key: &TokenKey) -> anyhow::Result<bool> {
        Ok(self.tokens.remove(key).is_some())
    }
}

#[async_trait]
impl EndpointRepository for MemoryStore {
    async fn find(&self, guid: &str) -> anyhow::Result<Option<EndpointRecord>> {
        Ok(self.endpoints.get(guid).map(|e| e.value().clone()))
    }

    async fn list(&self) -> anyhow::Result<Vec<EndpointRecord>> {
        let mut all: Vec<EndpointRecord> =
            self.endpoints.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn save(&self, endpoint: &EndpointRecord) -> anyhow::Result<()> {
        self.endpoints.insert(endpoint.guid.clone(), endpoint.clone());
        Ok(())
    }

    async fn set_sso_allowed(&self, guid: &str, allowed: bool) -> anyhow::Result<()> {
        match self.endpoints.get_mut(guid) {
            Some(mut ep) => {
                ep.sso_allowed = allowed;
                Ok(())
            }
            None => anyhow::bail!("endpoint {} not registered", guid),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn save(&self, id: &str, record: &SessionRecord) -> anyhow::Result<()> {
        self.sessions.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<u64> {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_on > now);
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn close(&self) {
        self.sessions.clear();
    }
}
