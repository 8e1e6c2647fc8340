use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Identifier of a cluster member: the `ip:port` it receives datagrams on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    /// Resolves the id back to the socket address datagrams are sent to.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.0.parse().ok()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Liveness of a member as seen by the local node.
///
/// `Failed` and `Left` are terminal: only a strictly newer incarnation
/// published by the member itself brings it back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Alive,
    Suspected,
    Failed,
    Left,
}

impl MemberStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MemberStatus::Failed | MemberStatus::Left)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Alive => write!(f, "alive"),
            MemberStatus::Suspected => write!(f, "suspected"),
            MemberStatus::Failed => write!(f, "failed"),
            MemberStatus::Left => write!(f, "left"),
        }
    }
}

/// One row of the membership table.
///
/// `(incarnation, last_updated)` orders conflicting reports about the same
/// member. The incarnation is only ever raised by the member itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEntry {
    pub status: MemberStatus,
    pub incarnation: u64,
    pub last_updated: u64,
}

impl MembershipEntry {
    pub fn alive(incarnation: u64, last_updated: u64) -> Self {
        Self {
            status: MemberStatus::Alive,
            incarnation,
            last_updated,
        }
    }

    /// Whether `self` should replace `current` when both describe the same member.
    ///
    /// An Alive report at the suspected incarnation or later refutes a
    /// suspicion regardless of timestamps.
    pub fn supersedes(&self, current: &MembershipEntry) -> bool {
        if self.incarnation != current.incarnation {
            return self.incarnation > current.incarnation;
        }

        if self.status == MemberStatus::Alive && current.status == MemberStatus::Suspected {
            return true;
        }

        // Stale reports must not resurrect a terminal entry.
        if current.status.is_terminal() && !self.status.is_terminal() {
            return false;
        }

        self.last_updated > current.last_updated
    }
}

/// The wire and seed representation of a whole table.
pub type TableSnapshot = BTreeMap<NodeId, MembershipEntry>;

/// Transition kinds written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Joined,
    Suspicion,
    Resume,
    Failure,
    Left,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Joined => write!(f, "joined"),
            AuditAction::Suspicion => write!(f, "suspicion"),
            AuditAction::Resume => write!(f, "resume"),
            AuditAction::Failure => write!(f, "failure"),
            AuditAction::Left => write!(f, "left"),
        }
    }
}

/// A status change applied to the local table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub node: NodeId,
    pub from: Option<MemberStatus>,
    pub to: MemberStatus,
    pub incarnation: u64,
    pub timestamp: u64,
}

impl Transition {
    pub fn action(&self) -> Option<AuditAction> {
        match (self.from, self.to) {
            (None, MemberStatus::Alive) => Some(AuditAction::Joined),
            (None, _) => None,
            (Some(from), to) if from == to => None,
            (Some(MemberStatus::Suspected), MemberStatus::Alive) => Some(AuditAction::Resume),
            (Some(_), MemberStatus::Alive) => Some(AuditAction::Joined),
            (Some(_), MemberStatus::Suspected) => Some(AuditAction::Suspicion),
            (Some(_), MemberStatus::Failed) => Some(AuditAction::Failure),
            (Some(_), MemberStatus::Left) => Some(AuditAction::Left),
        }
    }

    pub fn enters_suspicion(&self) -> bool {
        self.to == MemberStatus::Suspected && self.from != Some(MemberStatus::Suspected)
    }

    pub fn leaves_suspicion(&self) -> bool {
        self.from == Some(MemberStatus::Suspected) && self.to != MemberStatus::Suspected
    }
}

/// Lifecycle of the local node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Joining,
    Running,
    Leaving,
    Stopped,
}

/// How a probe timeout is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// A missed ack marks the peer failed immediately.
    DirectFail,
    /// A missed ack marks the peer suspected; failure follows only if nobody refutes it.
    SuspectThenFail,
}

impl DetectionMode {
    pub fn from_suspicion(enabled: bool) -> Self {
        if enabled {
            DetectionMode::SuspectThenFail
        } else {
            DetectionMode::DirectFail
        }
    }

    pub fn suspicion_enabled(self) -> bool {
        self == DetectionMode::SuspectThenFail
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
