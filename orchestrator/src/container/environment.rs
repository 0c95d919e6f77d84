//! Bound execution environments

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A running container bound to one (user, session) pair
#[derive(Debug)]
pub struct Environment {
    pub container_id: String,
    pub image: String,
    pub user_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    exec_lock: Arc<Mutex<()>>,
    executions: AtomicU64,
    released: AtomicBool,
}

/// Shared handle to an environment
pub type EnvironmentHandle = Arc<Environment>;

impl Environment {
    pub fn new(
        container_id: impl Into<String>,
        image: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            image: image.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            exec_lock: Arc::new(Mutex::new(())),
            executions: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Wait until no other command holds the environment
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.exec_lock.clone().lock_owned().await
    }

    /// Count a started command; returns the new total
    pub fn record_execution(&self) -> u64 {
        self.executions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Claim removal of the container. Only the first caller gets true.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let env = Environment::new("c1", "img:tag", "ada", "s1");
        let guard = env.lock().await;
        assert!(env.exec_lock.try_lock().is_err());
        drop(guard);
        assert!(env.exec_lock.try_lock().is_ok());
    }

    #[test]
    fn test_execution_counter() {
        let env = Environment::new("c1", "img:tag", "ada", "s1");
        assert_eq!(env.execution_count(), 0);
        assert_eq!(env.record_execution(), 1);
        assert_eq!(env.record_execution(), 2);
        assert_eq!(env.execution_count(), 2);
    }

    #[test]
    fn test_release_is_claimed_once() {
        let env = Environment::new("c1", "img:tag", "ada", "s1");
        assert!(env.mark_released());
        assert!(!env.mark_released());
    }
}
