//! Per-session mutual exclusion.
//!
//! Each session has a FIFO mutex: concurrent acquirers queue in the order
//! they started waiting. The holder gets a [`LockGuard`] carrying the turn's
//! abort signal. Dropping the guard releases the lock, so a panicking or
//! early-returning turn never leaves its session busy.

use std::sync::Arc;

use dashmap::DashMap;
use helm_core::ids::SessionId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct Inner {
    slots: DashMap<SessionId, Arc<Mutex<()>>>,
    active: DashMap<SessionId, CancellationToken>,
}

/// Session lock table. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SessionLock {
    inner: Arc<Inner>,
}

impl SessionLock {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &SessionId) -> LockGuard {
        self.acquire_with(session_id, &CancellationToken::new()).await
    }

    /// Like [`acquire`](Self::acquire), with a signal that also fires when
    /// `parent` is cancelled.
    pub async fn acquire_with(&self, session_id: &SessionId, parent: &CancellationToken) -> LockGuard {
        let slot = Arc::clone(self.inner.slots.entry(session_id.clone()).or_default().value());
        let guard = Arc::clone(&slot).lock_owned().await;
        let signal = parent.child_token();
        let _ = self.inner.active.insert(session_id.clone(), signal.clone());
        debug!(session_id = %session_id, "session lock acquired");
        LockGuard {
            inner: Arc::clone(&self.inner),
            session_id: session_id.clone(),
            signal,
            held: Some((guard, slot)),
        }
    }

    /// Whether a turn currently holds `session_id`.
    #[must_use]
    pub fn is_locked(&self, session_id: &SessionId) -> bool {
        self.inner.active.contains_key(session_id)
    }

    /// Fire the abort signal of the turn holding `session_id`.
    ///
    /// Returns `false` if the session is idle.
    pub fn abort(&self, session_id: &SessionId) -> bool {
        match self.inner.active.get(session_id) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }
}

/// Exclusive access to one session.
pub struct LockGuard {
    inner: Arc<Inner>,
    session_id: SessionId,
    signal: CancellationToken,
    held: Option<(OwnedMutexGuard<()>, Arc<Mutex<()>>)>,
}

impl LockGuard {
    /// The abort signal for this turn.
    #[must_use]
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Fire the abort signal.
    pub fn abort(&self) {
        self.signal.cancel();
    }

    /// The locked session.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Release the lock. Later calls do nothing.
    pub fn release(&mut self) {
        let Some((guard, slot)) = self.held.take() else {
            return;
        };
        let _ = self.inner.active.remove(&self.session_id);
        drop(guard);
        drop(slot);
        // Waiters hold clones of the slot; only drop it when nobody does.
        let _ = self
            .inner
            .slots
            .remove_if(&self.session_id, |_, slot| Arc::strong_count(slot) == 1);
        debug!(session_id = %self.session_id, "session lock released");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn release_is_idempotent_and_frees_the_session() {
        let locks = SessionLock::new();
        let session = SessionId::new();
        let mut guard = locks.acquire(&session).await;
        assert!(locks.is_locked(&session));
        guard.release();
        guard.release();
        assert!(!locks.is_locked(&session));
        assert!(locks.inner.slots.is_empty());
        drop(guard);
        let _again = locks.acquire(&session).await;
        assert!(locks.is_locked(&session));
    }

    #[tokio::test]
    async fn waiters_are_served_in_submission_order() {
        let locks = SessionLock::new();
        let session = SessionId::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = locks.acquire(&session).await;

        let mut handles = Vec::new();
        for n in 0..3 {
            let locks = locks.clone();
            let session = session.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&session).await;
                order.lock().push(n);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
            tokio::task::yield_now().await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(!locks.is_locked(&session));
    }

    #[tokio::test]
    async fn sessions_do_not_block_each_other() {
        let locks = SessionLock::new();
        let _a = locks.acquire(&SessionId::new()).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&SessionId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn abort_fires_the_holders_signal() {
        let locks = SessionLock::new();
        let session = SessionId::new();
        assert!(!locks.abort(&session));
        let guard = locks.acquire(&session).await;
        assert!(locks.abort(&session));
        assert!(guard.signal().is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_the_signal() {
        let locks = SessionLock::new();
        let parent = CancellationToken::new();
        let guard = locks.acquire_with(&SessionId::new(), &parent).await;
        parent.cancel();
        assert!(guard.signal().is_cancelled());
    }
}
