//! Protocol Engine
//!
//! Owns every piece of per-node protocol state (table, probes, suspicions) and
//! turns events into state changes plus the datagrams they require. It performs
//! no I/O and never sleeps: the node agent feeds it inbound messages and timer
//! ticks, then ships the returned envelopes.

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::audit::AuditLog;
use super::config::MembershipConfig;
use super::detector::FailureDetector;
use super::gossip::{gossip_message, select_targets};
use super::protocol::Message;
use super::suspicion::SuspicionTracker;
use super::table::MembershipTable;
use super::transport::Envelope;
use super::types::{
    AuditAction, DetectionMode, MemberStatus, NodeId, TableSnapshot, Transition, now_ms,
};

pub struct MembershipEngine {
    table: MembershipTable,
    detector: FailureDetector,
    suspicion: SuspicionTracker,
    mode: DetectionMode,
    fanout: usize,
    audit: Arc<dyn AuditLog>,
    rng: StdRng,
}

impl MembershipEngine {
    pub fn new(
        local: NodeId,
        seed: TableSnapshot,
        config: &MembershipConfig,
        audit: Arc<dyn AuditLog>,
        rng: StdRng,
    ) -> Self {
        let table = MembershipTable::new(local, seed, now_ms());
        let own = table.local_entry();
        audit.record_transition(
            table.local_id(),
            AuditAction::Joined,
            own.incarnation,
            own.last_updated,
        );

        let mut suspicion = SuspicionTracker::new(config.suspicion_timeout_ticks);
        for seeded in table.members_with(MemberStatus::Suspected) {
            suspicion.suspect(seeded);
        }

        Self {
            table,
            detector: FailureDetector::new(config.probe_timeout_ticks),
            suspicion,
            mode: config.detection,
            fanout: config.gossip_fanout,
            audit,
            rng,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        self.table.local_id()
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    fn is_departed(&self) -> bool {
        self.table.local_entry().status != MemberStatus::Alive
    }

    /// Dispatches one inbound message from `from`.
    pub fn handle_message(&mut self, message: Message, from: SocketAddr) -> Vec<Envelope> {
        let sender = NodeId::from_addr(from);
        if sender == *self.table.local_id() {
            return Vec::new();
        }

        // A farewell round already says the sender is gone; nothing to correct.
        let farewell = matches!(
            &message,
            Message::Gossip { table }
                if table.get(&sender).is_some_and(|entry| entry.status.is_terminal())
        );

        let mut outbound = match message {
            Message::Ping { sequence } => self.handle_ping(&sender, from, sequence),
            Message::Ack { sequence } => {
                self.handle_ack(&sender, sequence);
                Vec::new()
            }
            Message::Gossip { table } => {
                self.handle_gossip(&table);
                Vec::new()
            }
        };

        if !farewell {
            outbound.extend(self.inform_excluded(&sender, from));
        }
        outbound
    }

    /// A sender we hold as Failed/Left is still talking, so it has restarted
    /// or was wrongly declared dead. Hands it our table: its own entry there
    /// makes it refute with a higher incarnation, which readmits it everywhere.
    fn inform_excluded(&self, sender: &NodeId, from: SocketAddr) -> Option<Envelope> {
        if self.is_departed() {
            return None;
        }

        let status = self.table.status_of(sender)?;
        if !status.is_terminal() {
            return None;
        }

        tracing::debug!("Sending table to {} peer {}", status, sender);
        Some(Envelope {
            to: from,
            message: gossip_message(self.table.snapshot()),
        })
    }

    fn handle_ping(&mut self, sender: &NodeId, from: SocketAddr, sequence: u64) -> Vec<Envelope> {
        tracing::debug!("Received ping {} from {}", sequence, sender);

        let now = now_ms();
        if let Some(transition) = self.table.observe(sender, now) {
            tracing::info!("Discovered new member via ping: {}", sender);
            self.apply(transition);
        } else if self.table.status_of(sender) == Some(MemberStatus::Suspected) {
            self.refute(sender, now);
        }

        if self.is_departed() {
            return Vec::new();
        }

        vec![Envelope {
            to: from,
            message: Message::Ack { sequence },
        }]
    }

    fn handle_ack(&mut self, sender: &NodeId, sequence: u64) {
        let now = now_ms();

        if self.detector.acknowledge(sender, sequence) {
            tracing::debug!("Ack {} from {} confirmed", sequence, sender);
            if let Some(transition) = self.table.set_status(sender, MemberStatus::Alive, now) {
                self.apply(transition);
            }
            return;
        }

        match self.table.status_of(sender) {
            Some(MemberStatus::Suspected) => self.refute(sender, now),
            _ => tracing::debug!("Ignoring stale ack {} from {}", sequence, sender),
        }
    }

    fn handle_gossip(&mut self, incoming: &TableSnapshot) {
        let transitions = self.table.merge(incoming, now_ms());
        for transition in transitions {
            self.apply(transition);
        }
    }

    /// Direct evidence that a suspected member is alive.
    fn refute(&mut self, target: &NodeId, now: u64) {
        if let Some(transition) = self.table.set_status(target, MemberStatus::Alive, now) {
            self.apply(transition);
        }
    }

    /// Probe round: pings one random Alive peer that has no probe in flight.
    pub fn probe(&mut self) -> Vec<Envelope> {
        if self.is_departed() {
            return Vec::new();
        }

        let Some(target) = self
            .detector
            .pick_target(self.table.known_peers(), &mut self.rng)
        else {
            return Vec::new();
        };

        let Some(to) = target.addr() else {
            tracing::warn!("Cannot probe {}: not a socket address", target);
            return Vec::new();
        };

        let sequence = self.detector.start_probe(target.clone());
        tracing::debug!("Probing {} (seq={})", target, sequence);

        vec![Envelope {
            to,
            message: Message::Ping { sequence },
        }]
    }

    /// Detector tick: counts down suspicions, then probes.
    ///
    /// Suspicions go first so one that starts in this tick gets its full budget.
    pub fn sweep(&mut self) {
        let now = now_ms();

        for target in self.suspicion.tick() {
            if self.table.status_of(&target) != Some(MemberStatus::Suspected) {
                continue;
            }
            tracing::warn!("Suspicion of {} expired", target);
            if let Some(transition) = self.table.set_status(&target, MemberStatus::Failed, now) {
                self.apply(transition);
            }
        }

        for target in self.detector.tick() {
            if self.table.status_of(&target) != Some(MemberStatus::Alive) {
                continue;
            }

            let status = match self.mode {
                DetectionMode::DirectFail => MemberStatus::Failed,
                DetectionMode::SuspectThenFail => MemberStatus::Suspected,
            };
            tracing::warn!("Probe of {} timed out, marking {}", target, status);

            if let Some(transition) = self.table.set_status(&target, status, now) {
                self.apply(transition);
            }
        }
    }

    /// Gossip round: the full table to `min(fanout, |KnownPeers|)` random peers.
    pub fn gossip(&mut self) -> Vec<Envelope> {
        let targets = select_targets(
            self.table.known_peers(),
            self.table.local_id(),
            self.fanout,
            &mut self.rng,
        );
        if targets.is_empty() {
            return Vec::new();
        }

        let message = gossip_message(self.table.snapshot());
        targets
            .into_iter()
            .filter_map(|target| target.addr())
            .map(|to| Envelope {
                to,
                message: message.clone(),
            })
            .collect()
    }

    /// Switches between direct failure and suspect-then-fail.
    ///
    /// Turning suspicion off refutes every outstanding suspicion at once.
    pub fn set_suspicion(&mut self, enabled: bool) {
        let mode = DetectionMode::from_suspicion(enabled);
        if mode == self.mode {
            return;
        }

        tracing::info!("Suspicion {}", if enabled { "enabled" } else { "disabled" });
        self.mode = mode;

        if !enabled {
            let now = now_ms();
            for target in self.suspicion.clear() {
                self.refute(&target, now);
            }
        }
    }

    /// Marks the local node Left and returns the farewell gossip round.
    pub fn leave(&mut self) -> Vec<Envelope> {
        if self.is_departed() {
            return Vec::new();
        }

        let transition = self.table.depart(now_ms());
        tracing::info!(
            "Node {} leaving (inc={})",
            transition.node,
            transition.incarnation
        );
        self.record(&transition);
        self.detector.clear();
        self.suspicion.clear();

        self.gossip()
    }

    pub fn view(&self) -> MembershipView {
        MembershipView {
            local: self.table.local_id().clone(),
            members: self.table.snapshot(),
            suspects: self.suspicion.suspects(),
            suspicion_enabled: self.mode.suspicion_enabled(),
        }
    }

    /// Funnels every status change through the side effects it implies.
    fn apply(&mut self, transition: Transition) {
        if transition.leaves_suspicion() {
            self.suspicion.refute(&transition.node);
        }

        if transition.enters_suspicion() {
            self.detector.forget(&transition.node);
            self.suspicion.suspect(transition.node.clone());
        }

        if transition.to.is_terminal() {
            self.detector.forget(&transition.node);
        }

        self.record(&transition);
    }

    fn record(&self, transition: &Transition) {
        let Some(action) = transition.action() else {
            return;
        };

        tracing::info!(
            "Node {} has {} (inc={})",
            transition.node,
            action,
            transition.incarnation
        );
        self.audit.record_transition(
            &transition.node,
            action,
            transition.incarnation,
            transition.timestamp,
        );
    }
}

/// Read-only copy of a node's state, as served to the command surface.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipView {
    pub local: NodeId,
    pub members: TableSnapshot,
    pub suspects: Vec<NodeId>,
    pub suspicion_enabled: bool,
}

impl MembershipView {
    pub fn status_of(&self, id: &NodeId) -> Option<MemberStatus> {
        self.members.get(id).map(|entry| entry.status)
    }

    pub fn alive_members(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|(_, entry)| entry.status == MemberStatus::Alive)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn render(&self) -> String {
        let mut lines = vec!["================Membership List=================".to_string()];
        for (id, entry) in &self.members {
            let time = DateTime::from_timestamp_millis(entry.last_updated as i64)
                .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let marker = if *id == self.local { " (self)" } else { "" };
            lines.push(format!(
                "id: {}{} - incarnation: {} - status: {} - time: {}",
                id, marker, entry.incarnation, entry.status, time
            ));
        }
        lines.push("================================================".to_string());
        lines.join("\n")
    }

    pub fn render_suspects(&self) -> String {
        let mut lines = vec!["================Suspicion List=================".to_string()];
        lines.extend(self.suspects.iter().map(|id| id.to_string()));
        lines.push("================================================".to_string());
        lines.join("\n")
    }
}
