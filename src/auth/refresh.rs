//! Single-flight coordination for token refreshes.
//!
//! Callers remember the record they saw, take the key's lock, then re-read the
//! record. If it changed while they waited, another request already refreshed it
//! and they reuse the stored result instead of spending the refresh token again.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{TokenKey, TokenRecord};

#[derive(Default)]
pub struct RefreshGuards {
    // Entries are never removed; one small mutex per (target, owner) that ever refreshed.
    locks: DashMap<TokenKey, Arc<Mutex<()>>>,
}

impl RefreshGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &TokenKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// True when `current` is no longer the record the caller based its decision on.
    pub fn superseded(observed: &TokenRecord, current: &TokenRecord) -> bool {
        observed.auth_token != current.auth_token
            || observed.refresh_token != current.refresh_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthType, TokenOwner};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_serialises_same_key() {
        let guards = Arc::new(RefreshGuards::new());
        let key = TokenKey::endpoint("e1", TokenOwner::user("alice"));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let (guards, key, inside, max_seen) =
                (guards.clone(), key.clone(), inside.clone(), max_seen.clone());
            tasks.push(tokio::spawn(async move {
                let _permit = guards.lock(&key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let guards = RefreshGuards::new();
        let _a = guards.lock(&TokenKey::console("alice")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            guards.lock(&TokenKey::console("bob")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[test]
    fn test_superseded_compares_tokens() {
        let a = TokenRecord::new(AuthType::OAuth2, "a1", "r1", None);
        let mut b = a.clone();
        assert!(!RefreshGuards::superseded(&a, &b));
        b.refresh_token = "r2".into();
        assert!(RefreshGuards::superseded(&a, &b));
    }
}
