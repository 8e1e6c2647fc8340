//! Membership Table
//!
//! The local node's authoritative view of every member it has ever observed,
//! together with the derived `KnownPeers` set (members currently believed Alive,
//! excluding the local node). All status changes go through this type so the
//! Alive set never drifts from the table.

use std::collections::BTreeSet;

use super::types::{MemberStatus, MembershipEntry, NodeId, TableSnapshot, Transition};

pub struct MembershipTable {
    local: NodeId,
    entries: TableSnapshot,
    known_peers: BTreeSet<NodeId>,
}

impl MembershipTable {
    /// Builds the table from a seed snapshot and registers the local node as Alive.
    ///
    /// A re-joining node starts one incarnation above whatever the seed recorded
    /// for it, so its fresh Alive entry outranks any stale Failed/Left report.
    pub fn new(local: NodeId, seed: TableSnapshot, now: u64) -> Self {
        let incarnation = seed
            .get(&local)
            .map(|entry| entry.incarnation + 1)
            .unwrap_or(1);

        let mut table = Self {
            local: local.clone(),
            entries: TableSnapshot::new(),
            known_peers: BTreeSet::new(),
        };

        for (id, entry) in seed {
            if id != local {
                table.apply(id, entry);
            }
        }
        table.apply(local, MembershipEntry::alive(incarnation, now));

        table
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn local_entry(&self) -> MembershipEntry {
        self.entries
            .get(&self.local)
            .copied()
            .unwrap_or_else(|| MembershipEntry::alive(1, 0))
    }

    pub fn get(&self, id: &NodeId) -> Option<&MembershipEntry> {
        self.entries.get(id)
    }

    pub fn status_of(&self, id: &NodeId) -> Option<MemberStatus> {
        self.entries.get(id).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.entries.clone()
    }

    /// Members currently believed Alive, never including the local node.
    pub fn known_peers(&self) -> &BTreeSet<NodeId> {
        &self.known_peers
    }

    pub fn members_with(&self, status: MemberStatus) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Merges a gossiped table into the local one, entry by entry.
    ///
    /// Returns the status changes that were applied. Reports about the local
    /// node are never adopted; see [`MembershipTable::refute_self`].
    pub fn merge(&mut self, incoming: &TableSnapshot, now: u64) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for (id, reported) in incoming {
            if *id == self.local {
                self.refute_self(reported, now);
                continue;
            }

            // lastUpdated never moves backwards, so a refuted suspicion cannot
            // win again on its timestamp alone.
            let (previous, adopted) = match self.entries.get(id) {
                Some(current) if !reported.supersedes(current) => continue,
                Some(current) => (
                    Some(current.status),
                    MembershipEntry {
                        last_updated: reported.last_updated.max(current.last_updated),
                        ..*reported
                    },
                ),
                None => (None, *reported),
            };

            self.apply(id.clone(), adopted);

            if previous != Some(adopted.status) {
                transitions.push(Transition {
                    node: id.clone(),
                    from: previous,
                    to: adopted.status,
                    incarnation: adopted.incarnation,
                    timestamp: adopted.last_updated,
                });
            }
        }

        transitions
    }

    /// Counters a foreign claim that the local node is not Alive.
    ///
    /// Claims about an older incarnation are already outranked by the local
    /// entry. A claim about the current (or a newer, pre-restart) incarnation
    /// is answered by moving one incarnation past it.
    fn refute_self(&mut self, reported: &MembershipEntry, now: u64) {
        let own = self.local_entry();
        if own.status != MemberStatus::Alive {
            return;
        }

        if reported.status == MemberStatus::Alive {
            if reported.incarnation > own.incarnation {
                self.apply(
                    self.local.clone(),
                    MembershipEntry::alive(reported.incarnation, now),
                );
            }
            return;
        }

        if reported.incarnation >= own.incarnation {
            let incarnation = reported.incarnation + 1;
            tracing::info!(
                "Refuting {} report about self (inc={}), now inc={}",
                reported.status,
                reported.incarnation,
                incarnation
            );
            self.apply(self.local.clone(), MembershipEntry::alive(incarnation, now));
        }
    }

    /// Records direct contact from `id`, adding it as a new Alive member if unknown.
    pub fn observe(&mut self, id: &NodeId, now: u64) -> Option<Transition> {
        if self.entries.contains_key(id) || *id == self.local {
            return None;
        }

        self.apply(id.clone(), MembershipEntry::alive(1, now));
        Some(Transition {
            node: id.clone(),
            from: None,
            to: MemberStatus::Alive,
            incarnation: 1,
            timestamp: now,
        })
    }

    /// Applies a locally detected status change, keeping the member's incarnation.
    ///
    /// Setting the current status again only refreshes `last_updated`.
    pub fn set_status(
        &mut self,
        id: &NodeId,
        status: MemberStatus,
        now: u64,
    ) -> Option<Transition> {
        if *id == self.local {
            return None;
        }

        let current = *self.entries.get(id)?;
        let updated = MembershipEntry {
            status,
            incarnation: current.incarnation,
            last_updated: now.max(current.last_updated),
        };
        self.apply(id.clone(), updated);

        (current.status != status).then(|| Transition {
            node: id.clone(),
            from: Some(current.status),
            to: status,
            incarnation: current.incarnation,
            timestamp: updated.last_updated,
        })
    }

    /// Marks the local node Left under a fresh incarnation.
    pub fn depart(&mut self, now: u64) -> Transition {
        let own = self.local_entry();
        let incarnation = own.incarnation + 1;
        self.apply(
            self.local.clone(),
            MembershipEntry {
                status: MemberStatus::Left,
                incarnation,
                last_updated: now,
            },
        );

        Transition {
            node: self.local.clone(),
            from: Some(own.status),
            to: MemberStatus::Left,
            incarnation,
            timestamp: now,
        }
    }

    fn apply(&mut self, id: NodeId, entry: MembershipEntry) {
        if id != self.local {
            if entry.status == MemberStatus::Alive {
                self.known_peers.insert(id.clone());
            } else {
                self.known_peers.remove(&id);
            }
        }

        self.entries.insert(id, entry);
    }
}
