//! Peer expiry by missing heartbeats.
//!
//! Every heartbeat refreshes the peer's last-seen time. A periodic sweep
//! collects the peers that stayed silent for longer than the check interval;
//! those ids are fed to the controller as removals.

use crate::controller::{ArchipelagoController, ControllerError};
use archipelago_env::{ArchipelagoContext, WorkerChannel};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Last heartbeat per peer, on the context's monotonic clock.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    check_interval: Duration,
    last_seen: HashMap<String, Duration>,
}

impl HeartbeatTracker {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            last_seen: HashMap::new(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Records a heartbeat from `peer_id` at `now`.
    pub fn record(&mut self, peer_id: impl Into<String>, now: Duration) {
        self.last_seen.insert(peer_id.into(), now);
    }

    /// Stops tracking a peer that left on its own.
    pub fn forget(&mut self, peer_id: &str) -> bool {
        self.last_seen.remove(peer_id).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    /// Removes and returns (sorted) the peers whose last heartbeat is older
    /// than `now - check_interval`.
    pub fn expired(&mut self, now: Duration) -> Vec<String> {
        let Some(deadline) = now.checked_sub(self.check_interval) else {
            return Vec::new();
        };

        let mut expired: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, last)| **last < deadline)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        expired.sort();

        for peer_id in &expired {
            self.last_seen.remove(peer_id);
        }
        expired
    }

    /// Sweeps expired peers into the controller's removal buffer.
    pub fn sweep<Ctx, Ch>(
        &mut self,
        ctx: &Ctx,
        controller: &ArchipelagoController<Ctx, Ch>,
    ) -> Result<Vec<String>, ControllerError>
    where
        Ctx: ArchipelagoContext,
        Ch: WorkerChannel,
    {
        let expired = self.expired(ctx.now());
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expiring silent peers");
            controller.clear_peers(expired.iter().cloned())?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn test_silent_peers_expire() {
        let mut tracker = HeartbeatTracker::new(secs(10));
        tracker.record("quiet", secs(1));
        tracker.record("chatty", secs(1));
        tracker.record("chatty", secs(15));

        assert_eq!(tracker.expired(secs(20)), vec!["quiet"]);
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn test_expiry_is_strictly_older_than_interval() {
        let mut tracker = HeartbeatTracker::new(secs(10));
        tracker.record("edge", secs(5));

        assert!(tracker.expired(secs(15)).is_empty());
        assert_eq!(tracker.expired(secs(16)), vec!["edge"]);
    }

    #[test]
    fn test_expired_peers_are_reported_once() {
        let mut tracker = HeartbeatTracker::new(secs(1));
        tracker.record("a", secs(0));

        assert_eq!(tracker.expired(secs(5)).len(), 1);
        assert!(tracker.expired(secs(10)).is_empty());
    }

    #[test]
    fn test_nothing_expires_before_first_interval() {
        let mut tracker = HeartbeatTracker::new(secs(30));
        tracker.record("a", secs(0));

        assert!(tracker.expired(secs(5)).is_empty());
        assert!(tracker.forget("a"));
        assert!(!tracker.forget("a"));
    }
}
