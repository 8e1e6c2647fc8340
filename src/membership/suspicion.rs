//! Suspicion Sub-protocol
//!
//! Holds one countdown per suspected member. A countdown is cancelled by any
//! refutation; one that runs out means the member is declared failed.

use super::types::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspicionRecord {
    pub target: NodeId,
    pub ticks_remaining: u32,
}

pub struct SuspicionTracker {
    records: Vec<SuspicionRecord>,
    timeout_ticks: u32,
}

impl SuspicionTracker {
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            records: Vec::new(),
            timeout_ticks,
        }
    }

    /// Starts the countdown for `target`. An existing countdown is left running.
    pub fn suspect(&mut self, target: NodeId) {
        if self.is_suspected(&target) {
            return;
        }

        self.records.push(SuspicionRecord {
            target,
            ticks_remaining: self.timeout_ticks,
        });
    }

    pub fn is_suspected(&self, target: &NodeId) -> bool {
        self.records.iter().any(|record| &record.target == target)
    }

    /// Cancels the countdown for `target`. Returns whether one was running.
    pub fn refute(&mut self, target: &NodeId) -> bool {
        let before = self.records.len();
        self.records.retain(|record| &record.target != target);
        self.records.len() != before
    }

    pub fn tick(&mut self) -> Vec<NodeId> {
        let mut expired = Vec::new();

        self.records.retain_mut(|record| {
            record.ticks_remaining = record.ticks_remaining.saturating_sub(1);
            if record.ticks_remaining == 0 {
                expired.push(record.target.clone());
                false
            } else {
                true
            }
        });

        expired
    }

    /// Drops every countdown and returns the members that were suspected.
    pub fn clear(&mut self) -> Vec<NodeId> {
        self.records.drain(..).map(|record| record.target).collect()
    }

    pub fn suspects(&self) -> Vec<NodeId> {
        self.records.iter().map(|record| record.target.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: u16) -> NodeId {
        NodeId(format!("127.0.0.1:{}", port))
    }

    #[test]
    fn test_suspicion_expires_after_budget() {
        let mut tracker = SuspicionTracker::new(10);
        tracker.suspect(id(7001));

        for _ in 0..9 {
            assert!(tracker.tick().is_empty());
        }

        assert_eq!(tracker.tick(), vec![id(7001)]);
        assert!(!tracker.is_suspected(&id(7001)));
    }

    #[test]
    fn test_refute_cancels_countdown() {
        let mut tracker = SuspicionTracker::new(2);
        tracker.suspect(id(7001));

        assert!(tracker.refute(&id(7001)));
        assert!(!tracker.refute(&id(7001)));
        assert!(tracker.tick().is_empty());
        assert!(tracker.tick().is_empty());
    }

    #[test]
    fn test_repeated_suspect_keeps_original_deadline() {
        let mut tracker = SuspicionTracker::new(3);
        tracker.suspect(id(7001));
        tracker.tick();
        tracker.tick();
        tracker.suspect(id(7001));

        assert_eq!(tracker.tick(), vec![id(7001)]);
    }

    #[test]
    fn test_clear_returns_all_suspects() {
        let mut tracker = SuspicionTracker::new(3);
        tracker.suspect(id(7001));
        tracker.suspect(id(7002));

        let mut cleared = tracker.clear();
        cleared.sort();

        assert_eq!(cleared, vec![id(7001), id(7002)]);
        assert!(tracker.suspects().is_empty());
    }
}
