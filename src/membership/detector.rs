//! Probe-based Failure Detector
//!
//! Each probe round pings one random Alive peer and remembers the ping's
//! sequence number. Detector ticks count every outstanding probe down; a probe
//! that reaches zero before its ack arrives is reported as timed out.

use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;

use super::types::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub target: NodeId,
    pub sequence: u64,
    pub ticks_remaining: u32,
}

pub struct FailureDetector {
    probes: Vec<ProbeRecord>,
    next_sequence: u64,
    timeout_ticks: u32,
}

impl FailureDetector {
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            probes: Vec::new(),
            next_sequence: 1,
            timeout_ticks,
        }
    }

    /// Picks a probe target uniformly among `peers` that have no probe in flight.
    pub fn pick_target<R: Rng + ?Sized>(
        &self,
        peers: &BTreeSet<NodeId>,
        rng: &mut R,
    ) -> Option<NodeId> {
        peers
            .iter()
            .filter(|peer| !self.is_probing(peer))
            .choose(rng)
            .cloned()
    }

    /// Registers a ping to `target` and returns the sequence number to send.
    pub fn start_probe(&mut self, target: NodeId) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.probes.push(ProbeRecord {
            target,
            sequence,
            ticks_remaining: self.timeout_ticks,
        });

        sequence
    }

    pub fn is_probing(&self, target: &NodeId) -> bool {
        self.probes.iter().any(|probe| &probe.target == target)
    }

    /// Settles the probe matching both sender and sequence. Returns false for
    /// stale or unsolicited acks.
    pub fn acknowledge(&mut self, from: &NodeId, sequence: u64) -> bool {
        match self
            .probes
            .iter()
            .position(|probe| &probe.target == from && probe.sequence == sequence)
        {
            Some(index) => {
                self.probes.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Drops any probe in flight to `target`.
    pub fn forget(&mut self, target: &NodeId) {
        self.probes.retain(|probe| &probe.target != target);
    }

    /// Advances every outstanding probe by one tick and returns the targets
    /// whose probes ran out.
    pub fn tick(&mut self) -> Vec<NodeId> {
        let mut expired = Vec::new();

        self.probes.retain_mut(|probe| {
            probe.ticks_remaining = probe.ticks_remaining.saturating_sub(1);
            if probe.ticks_remaining == 0 {
                expired.push(probe.target.clone());
                false
            } else {
                true
            }
        });

        expired
    }

    pub fn outstanding(&self) -> &[ProbeRecord] {
        &self.probes
    }

    pub fn clear(&mut self) {
        self.probes.clear();
    }
}
