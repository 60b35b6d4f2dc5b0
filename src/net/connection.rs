//! WebSocket session accounting.
//!
//! # Responsibilities
//! - Enforce the concurrent session limit
//! - Generate unique connection IDs for tracing
//! - Let shutdown wait for sessions to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Using relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of an accepted WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Counts live sessions against a fixed limit.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    max: u64,
}

impl ConnectionTracker {
    pub fn new(max: usize) -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            max: max as u64,
        }
    }

    /// Reserve a slot. `None` when the limit is reached.
    pub fn try_track(&self) -> Option<ConnectionGuard> {
        self.active_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        })
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Wait until every session has closed or `timeout` elapses. Returns
    /// whether the tracker drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Holds one session slot; releases it on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(connection_id = %self.id, "Connection slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn limit_is_enforced() {
        let tracker = ConnectionTracker::new(2);
        let first = tracker.try_track().unwrap();
        let _second = tracker.try_track().unwrap();
        assert!(tracker.try_track().is_none());
        assert_eq!(tracker.active_count(), 2);

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.try_track().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_times_out_while_busy() {
        let tracker = ConnectionTracker::new(1);
        let guard = tracker.try_track().unwrap();
        assert!(!tracker.wait_idle(Duration::from_secs(1)).await);
        drop(guard);
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }
}
