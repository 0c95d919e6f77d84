//! Terminal session registry
//!
//! Issues opaque, URL-safe session ids and answers whether an id is valid.
//! Entries live for the whole process unless an idle timeout is configured,
//! in which case [`SessionRegistry::expire_idle`] removes stale ones.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Random bytes behind every session id
const SESSION_ID_BYTES: usize = 24;

#[derive(Debug, Clone)]
struct SessionRecord {
    last_activity: DateTime<Utc>,
}

/// In-memory set of valid sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh session id and mark it valid
    pub async fn create_session(&self) -> String {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        // 192 bits make a repeat practically impossible, but never hand out a live id twice
        let session_id = loop {
            let candidate = generate_session_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        sessions.insert(
            session_id.clone(),
            SessionRecord { last_activity: now },
        );
        drop(sessions);

        crate::metrics::record_session_created();
        info!(session_id = %session_id, "Session created");

        session_id
    }

    /// Whether the id was issued by this registry and has not expired
    pub async fn is_valid(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Record activity on a session. Returns false for unknown ids.
    pub async fn touch(&self, session_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(record) => {
                record.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Number of valid sessions
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions idle for longer than `max_idle` and return their ids
    pub async fn expire_idle(&self, max_idle: Duration) -> Vec<String> {
        self.expire_idle_at(Utc::now(), max_idle).await
    }

    async fn expire_idle_at(&self, now: DateTime<Utc>, max_idle: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, record)| now - record.last_activity > max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            sessions.remove(session_id);
            debug!(session_id = %session_id, "Session expired");
        }

        if !expired.is_empty() {
            crate::metrics::record_sessions_expired(expired.len());
        }
        expired
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_created_session_is_valid() {
        let registry = SessionRegistry::new();
        let session_id = registry.create_session().await;

        assert!(registry.is_valid(&session_id).await);
        assert!(!registry.is_valid("not-a-session").await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_session_ids_are_url_safe_and_distinct() {
        let registry = SessionRegistry::new();
        let mut seen = HashSet::new();

        for _ in 0..200 {
            let id = registry.create_session().await;
            assert_eq!(id.len(), 32);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(id));
        }
        assert_eq!(registry.count().await, 200);
    }

    #[tokio::test]
    async fn test_concurrent_creation_never_collides() {
        let registry = Arc::new(SessionRegistry::new());
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.create_session().await })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(registry.count().await, 32);
    }

    #[tokio::test]
    async fn test_sessions_persist_without_expiry() {
        let registry = SessionRegistry::new();
        let session_id = registry.create_session().await;

        assert!(registry.touch(&session_id).await);
        assert!(!registry.touch("unknown").await);
        assert!(registry.is_valid(&session_id).await);
    }

    #[tokio::test]
    async fn test_expire_idle_removes_only_stale_sessions() {
        let registry = SessionRegistry::new();
        let stale = registry.create_session().await;
        let fresh = registry.create_session().await;

        let later = Utc::now() + Duration::minutes(10);
        registry
            .sessions
            .write()
            .await
            .get_mut(&fresh)
            .unwrap()
            .last_activity = later;

        let expired = registry.expire_idle_at(later, Duration::minutes(5)).await;

        assert_eq!(expired, vec![stale.clone()]);
        assert!(!registry.is_valid(&stale).await);
        assert!(registry.is_valid(&fresh).await);
    }
}
