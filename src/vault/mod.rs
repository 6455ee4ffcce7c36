pub mod crypto;

use std::sync::Arc;

use anyhow::Context;

use crate::errors::AppError;
use crate::models::{TokenKey, TokenRecord};
use crate::store::{StoredToken, TokenRepository};
use crypto::{EncryptedSecret, VaultCrypto};

/// Encrypting front of the token repository. Access and refresh tokens are sealed
/// before they reach storage and opened on the way back; a row that cannot be
/// opened is an error, never a silent miss.
pub struct CredentialStore {
    crypto: VaultCrypto,
    repo: Arc<dyn TokenRepository>,
}

impl CredentialStore {
    pub fn new(key_hex: &str, repo: Arc<dyn TokenRepository>) -> anyhow::Result<Self> {
        Ok(Self {
            crypto: VaultCrypto::new(key_hex)?,
            repo,
        })
    }

    pub async fn save(&self, key: &TokenKey, record: &TokenRecord) -> Result<(), AppError> {
        let stored = StoredToken {
            auth_token: self.seal(&record.auth_token)?,
            refresh_token: self.seal(&record.refresh_token)?,
            token_expiry: record.token_expiry,
            auth_type: record.auth_type,
            disconnected: record.disconnected,
            linked_guid: record.linked_guid.clone(),
        };
        self.repo.upsert(key, stored).await?;
        tracing::debug!(key = %key, "token saved");
        Ok(())
    }

    pub async fn find(&self, key: &TokenKey) -> Result<Option<TokenRecord>, AppError> {
        let Some(stored) = self.repo.fetch(key).await? else {
            return Ok(None);
        };

        let auth_token = self
            .open(&stored.auth_token)
            .with_context(|| format!("access token for {} could not be decrypted", key))?;
        let refresh_token = self
            .open(&stored.refresh_token)
            .with_context(|| format!("refresh token for {} could not be decrypted", key))?;

        Ok(Some(TokenRecord {
            auth_token,
            refresh_token,
            token_expiry: stored.token_expiry,
            auth_type: stored.auth_type,
            system_shared: key.is_system_shared(),
            disconnected: stored.disconnected,
            linked_guid: stored.linked_guid,
        }))
    }

    /// Returns whether anything was deleted.
    pub async fn delete(&self, key: &TokenKey) -> Result<bool, AppError> {
        let removed = self.repo.remove(key).await?;
        tracing::debug!(key = %key, removed, "token deleted");
        Ok(removed)
    }

    fn seal(&self, plaintext: &str) -> anyhow::Result<String> {
        Ok(self.crypto.encrypt_string(plaintext)?.to_payload())
    }

    fn open(&self, payload: &str) -> anyhow::Result<String> {
        let sealed = EncryptedSecret::from_payload(payload)?;
        self.crypto.decrypt_string(&sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthType, TokenOwner};
    use crate::store::memory::MemoryStore;
    use chrono::{TimeZone, Utc};

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const OTHER_KEY: &str = "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100";

    fn record() -> TokenRecord {
        TokenRecord::new(
            AuthType::OAuth2,
            "access-123",
            "refresh-456",
            Some(Utc.timestamp_opt(1_900_000_000, 0).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_save_then_find_returns_equal_record() {
        let repo = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(KEY, repo.clone()).unwrap();
        let key = TokenKey::endpoint("e1", TokenOwner::user("alice"));

        store.save(&key, &record()).await.unwrap();
        assert_eq!(store.find(&key).await.unwrap(), Some(record()));

        // Nothing readable at rest.
        let raw = repo.fetch(&key).await.unwrap().unwrap();
        assert!(!raw.auth_token.contains("access-123"));
        assert!(!raw.refresh_token.contains("refresh-456"));
    }

    #[tokio::test]
    async fn test_find_with_different_key_fails_closed() {
        let repo = Arc::new(MemoryStore::new());
        let writer = CredentialStore::new(KEY, repo.clone()).unwrap();
        let reader = CredentialStore::new(OTHER_KEY, repo).unwrap();
        let key = TokenKey::console("alice");

        writer.save(&key, &record()).await.unwrap();
        assert!(matches!(reader.find(&key).await, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_shared_flag_follows_owner() {
        let store = CredentialStore::new(KEY, Arc::new(MemoryStore::new())).unwrap();
        let shared = TokenKey::endpoint("e1", TokenOwner::SystemShared);

        store.save(&shared, &record()).await.unwrap();
        let found = store.find(&shared).await.unwrap().unwrap();
        assert!(found.system_shared);

        let mine = TokenKey::endpoint("e1", TokenOwner::user("alice"));
        assert_eq!(store.find(&mine).await.unwrap(), None);
        assert!(store.delete(&shared).await.unwrap());
        assert_eq!(store.find(&shared).await.unwrap(), None);
    }
}
