//! Lamport logical clock and the request ordering it induces.

use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe Lamport clock, shared by every context of a peer through
/// cheap handle clones. It has its own mutex because it is ticked from
/// every send path and observed from every receive path.
#[derive(Clone)]
pub struct LamportClock(Arc<Mutex<i64>>);

impl LamportClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(0)))
    }

    /// Increment the clock and return the new value. Called immediately
    /// before stamping any outgoing message.
    pub async fn tick(&self) -> i64 {
        let mut time = self.0.lock().await;
        *time += 1;
        *time
    }

    /// Merge a received timestamp: `max(local, received) + 1`. Called
    /// immediately upon receiving any message, before acting on it.
    pub async fn observe(&self, received: i64) -> i64 {
        let mut time = self.0.lock().await;
        *time = (*time).max(received) + 1;
        *time
    }

    pub async fn now(&self) -> i64 {
        *self.0.lock().await
    }
}

impl Default for LamportClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The pair that totally orders concurrent requests: Lamport timestamp
/// first, requester id as the deterministic tie-breaker. Ids are unique,
/// so two fingerprints from different peers never compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestFingerprint {
    pub timestamp: i64,
    pub id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_is_strictly_increasing() {
        let clock = LamportClock::new();

        assert_eq!(clock.tick().await, 1);
        assert_eq!(clock.tick().await, 2);
        assert_eq!(clock.tick().await, 3);
    }

    #[tokio::test]
    async fn observe_jumps_past_the_received_timestamp() {
        let clock = LamportClock::new();

        assert_eq!(clock.observe(10).await, 11);
        assert_eq!(clock.now().await, 11);
    }

    #[tokio::test]
    async fn observe_of_an_old_timestamp_still_advances() {
        let clock = LamportClock::new();

        clock.observe(10).await;
        assert_eq!(clock.observe(3).await, 12);
    }

    #[test]
    fn lower_timestamp_wins() {
        let mine = RequestFingerprint { timestamp: 3, id: 2 };
        let theirs = RequestFingerprint { timestamp: 5, id: 1 };

        assert!(mine < theirs);
    }

    #[test]
    fn equal_timestamps_break_the_tie_by_id() {
        let first = RequestFingerprint { timestamp: 5, id: 1 };
        let second = RequestFingerprint { timestamp: 5, id: 2 };

        assert!(first < second);
        assert!(second > first);
    }
}
