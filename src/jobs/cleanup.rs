//! Background job: sweep expired sessions out of the session store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::store::SessionStore;

/// Spawn the background cleanup task. Call this once at startup; abort the handle
/// on shutdown.
pub fn spawn(store: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.cleanup().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "expired sessions removed"),
                Err(e) => tracing::error!("session cleanup failed: {:#}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::SessionRecord;
    use chrono::{Duration as ChronoDuration, Utc};

    fn record(offset_secs: i64) -> SessionRecord {
        SessionRecord {
            values: serde_json::Map::new(),
            expires_on: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn test_job_sweeps_expired_sessions() {
        let store = Arc::new(MemoryStore::new());
        tokio_test::assert_ok!(SessionStore::save(store.as_ref(), "old", &record(-60)).await);
        tokio_test::assert_ok!(SessionStore::save(store.as_ref(), "live", &record(600)).await);

        let handle = spawn(store.clone(), Duration::from_millis(10));
        time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.session_count(), 1);
        assert!(SessionStore::load(store.as_ref(), "live").await.unwrap().is_some());
    }
}
