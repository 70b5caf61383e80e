//! Per-session concurrency control.
//!
//! A session may only have one active turn at a time. A second request on
//! the same session while a turn is in flight is rejected with
//! [`SessionBusy`] — context writes are never interleaved.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Manages per-session run locks.
///
/// Each session id maps to a `Semaphore(1)`. Holding the permit grants
/// exclusive access for one turn; it auto-releases on drop.
pub struct SessionLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a session, without queueing: a busy
    /// session rejects immediately.
    pub fn acquire(&self, session_id: Uuid) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().map_err(|_| SessionBusy)
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for sessions that aren't actively held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

/// Error returned when a session already has a turn in progress.
#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy — a turn is already in progress")
    }
}

impl std::error::Error for SessionBusy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_access() {
        let map = SessionLockMap::new();
        let id = Uuid::new_v4();

        let permit1 = map.acquire(id).unwrap();
        drop(permit1);

        let permit2 = map.acquire(id).unwrap();
        drop(permit2);
    }

    #[test]
    fn concurrent_turn_on_same_session_is_rejected() {
        let map = SessionLockMap::new();
        let id = Uuid::new_v4();

        let _held = map.acquire(id).unwrap();
        assert!(map.acquire(id).is_err());
    }

    #[test]
    fn different_sessions_run_concurrently() {
        let map = SessionLockMap::new();

        let _p1 = map.acquire(Uuid::new_v4()).unwrap();
        let _p2 = map.acquire(Uuid::new_v4()).unwrap();
        assert_eq!(map.session_count(), 2);
    }

    #[test]
    fn prune_keeps_held_locks() {
        let map = SessionLockMap::new();
        let held_id = Uuid::new_v4();
        let idle_id = Uuid::new_v4();

        let _held = map.acquire(held_id).unwrap();
        let idle = map.acquire(idle_id).unwrap();
        drop(idle);

        map.prune_idle();
        assert_eq!(map.session_count(), 1);
        // The held session still rejects newcomers after pruning.
        assert!(map.acquire(held_id).is_err());
    }
}
