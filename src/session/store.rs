//! In-memory session registry keyed by user id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::session::state::Session;

/// Shared handle to one user's session. Holding the lock serializes that
/// user's events; different users proceed independently.
pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for `user_id`, creating an empty one on first use.
    pub async fn session(&self, user_id: i64) -> SessionHandle {
        if let Some(existing) = self.sessions.read().await.get(&user_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
            .clone()
    }

    /// Evict sessions idle for at least `ttl`. Sessions currently locked by
    /// an in-flight event are kept. Returns the number evicted.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => session.last_activity.elapsed() < ttl,
            Err(_) => true,
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::info!(pruned, remaining = sessions.len(), "Pruned idle sessions");
        }
        pruned
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Spawn the background prune task.
pub fn spawn_prune_task(
    store: Arc<SessionStore>,
    ttl: Duration,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip immediate first tick
        loop {
            interval.tick().await;
            store.prune_idle(ttl).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::Role;

    #[tokio::test]
    async fn same_user_gets_same_session() {
        let store = SessionStore::new();
        store.session(1).await.lock().await.role = Some(Role::Driver);
        let again = store.session(1).await;
        assert_eq!(again.lock().await.role, Some(Role::Driver));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn zero_ttl_evicts_everything_idle() {
        let store = SessionStore::new();
        store.session(1).await;
        store.session(2).await;
        assert_eq!(store.prune_idle(Duration::ZERO).await, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn recent_sessions_survive() {
        let store = SessionStore::new();
        store.session(1).await;
        assert_eq!(store.prune_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn locked_session_is_kept() {
        let store = SessionStore::new();
        let handle = store.session(1).await;
        let _guard = handle.lock().await;
        assert_eq!(store.prune_idle(Duration::ZERO).await, 0);
        assert_eq!(store.len().await, 1);
    }
}
