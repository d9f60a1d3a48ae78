//! Session module: per-chat conversation state with expiry.
//!
//! Every webhook delivery is handled independently, so the only state that
//! survives between deliveries is what lives here. Same-chat deliveries may
//! race; [`ChatLocks`] serializes them.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::models::{ChatState, SessionState};

/// Key-value store of conversation state, one entry per chat
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state, or `None` when absent or expired
    async fn get(&self, chat_id: i64) -> Option<SessionState>;
    /// Overwrite the state of a chat
    async fn set(&self, chat_id: i64, state: ChatState, ttl: Duration);
    /// Remove the state of a chat; absent keys are ignored
    async fn delete(&self, chat_id: i64);
    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> usize;
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: DashMap<i64, SessionState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, chat_id: i64) -> Option<SessionState> {
        let now = Utc::now();
        // Evict on read so an expired entry never resurfaces
        if let Some((_, expired)) = self
            .entries
            .remove_if(&chat_id, |_, session| session.is_expired_at(now))
        {
            debug!(chat_id, state = ?expired.state, "Session expired");
            return None;
        }
        self.entries.get(&chat_id).map(|entry| entry.value().clone())
    }

    async fn set(&self, chat_id: i64, state: ChatState, ttl: Duration) {
        debug!(chat_id, ?state, ttl_secs = ttl.as_secs(), "Session state set");
        self.entries
            .insert(chat_id, SessionState::new(chat_id, state, ttl));
    }

    async fn delete(&self, chat_id: i64) {
        if self.entries.remove(&chat_id).is_some() {
            debug!(chat_id, "Session state cleared");
        }
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, session| !session.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }
}

/// Per-chat async locks
///
/// Holding the guard for a chat id serializes all state reads and writes for
/// that chat; other chats are unaffected.
#[derive(Debug, Default)]
pub struct ChatLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Forget locks nobody holds or waits on
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_within_ttl() {
        let store = InMemorySessionStore::new();
        store
            .set(42, ChatState::AwaitingImage, Duration::from_secs(60))
            .await;

        let session = store.get(42).await.expect("session should exist");
        assert_eq!(session.chat_id, 42);
        assert_eq!(session.state, ChatState::AwaitingImage);
    }

    #[tokio::test]
    async fn test_set_overwrites_previous_state() {
        let store = InMemorySessionStore::new();
        store
            .set(42, ChatState::AwaitingImage, Duration::from_secs(60))
            .await;
        store.set(42, ChatState::Idle, Duration::from_secs(60)).await;

        assert_eq!(store.get(42).await.unwrap().state, ChatState::Idle);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = InMemorySessionStore::new();
        store
            .set(42, ChatState::AwaitingImage, Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get(42).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemorySessionStore::new();
        store.delete(7).await;

        store
            .set(7, ChatState::AwaitingImage, Duration::from_secs(60))
            .await;
        store.delete(7).await;
        store.delete(7).await;
        assert!(store.get(7).await.is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let store = InMemorySessionStore::new();
        store
            .set(1, ChatState::AwaitingImage, Duration::from_millis(10))
            .await;
        store
            .set(2, ChatState::AwaitingImage, Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert!(store.get(2).await.is_some());
    }

    #[tokio::test]
    async fn test_chat_locks_serialize_same_chat() {
        let locks = Arc::new(ChatLocks::new());
        let guard = locks.acquire(5).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(5).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!contender.is_finished());

        // A different chat is not blocked
        let other = tokio::time::timeout(Duration::from_millis(100), locks.acquire(6)).await;
        assert!(other.is_ok());
        drop(other);

        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.prune_idle(), 2);
        assert!(locks.is_empty());
    }
}
