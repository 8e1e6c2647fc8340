//! Seed Stores
//!
//! Where a joining node gets its first view of the cluster.

use anyhow::{Context, Result, anyhow};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::types::{MembershipEntry, NodeId, TableSnapshot};

pub trait SeedStore {
    fn load_initial_table(&self, self_id: &NodeId) -> Result<TableSnapshot>;
}

/// A JSON file holding a table in the gossip wire format.
pub struct JsonSeedFile {
    path: PathBuf,
}

impl JsonSeedFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SeedStore for JsonSeedFile {
    fn load_initial_table(&self, self_id: &NodeId) -> Result<TableSnapshot> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("No membership file found at {}", self.path.display()))?;

        let table: TableSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt membership file {}", self.path.display()))?;

        if let Some(bad) = table.keys().find(|id| id.addr().is_none()) {
            return Err(anyhow!(
                "Membership file {} contains invalid node id `{}`",
                self.path.display(),
                bad
            ));
        }

        tracing::info!(
            "Loaded {} seed entries from {} for {}",
            table.len(),
            self.path.display(),
            self_id
        );

        Ok(table)
    }
}

/// Seeds given as plain addresses, e.g. on the command line.
///
/// They enter the table Alive at incarnation 1 with a zero timestamp, so any
/// real report about them takes precedence.
pub struct StaticSeeds {
    peers: Vec<SocketAddr>,
}

impl StaticSeeds {
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        Self { peers }
    }
}

impl SeedStore for StaticSeeds {
    fn load_initial_table(&self, self_id: &NodeId) -> Result<TableSnapshot> {
        Ok(self
            .peers
            .iter()
            .map(|addr| NodeId::from_addr(*addr))
            .filter(|id| id != self_id)
            .map(|id| (id, MembershipEntry::alive(1, 0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::types::MemberStatus;

    fn self_id() -> NodeId {
        NodeId("127.0.0.1:7000".to_string())
    }

    #[test]
    fn test_json_seed_file_loads_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membership_list.json");
        std::fs::write(
            &path,
            r#"{
                "127.0.0.1:7001": {"status": "alive", "incarnation": 2, "lastUpdated": 0},
                "127.0.0.1:7002": {"status": "failed", "incarnation": 1, "lastUpdated": 10}
            }"#,
        )
        .unwrap();

        let table = JsonSeedFile::new(&path).load_initial_table(&self_id()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&NodeId("127.0.0.1:7002".to_string())].status,
            MemberStatus::Failed
        );
    }

    #[test]
    fn test_missing_seed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = JsonSeedFile::new(dir.path().join("absent.json"))
            .load_initial_table(&self_id())
            .unwrap_err();

        assert!(err.to_string().contains("No membership file found"));
    }

    #[test]
    fn test_corrupt_seed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membership_list.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonSeedFile::new(&path).load_initial_table(&self_id()).unwrap_err();
        assert!(err.to_string().contains("Corrupt membership file"));

        std::fs::write(
            &path,
            r#"{"nowhere": {"status": "alive", "incarnation": 1, "lastUpdated": 0}}"#,
        )
        .unwrap();
        assert!(JsonSeedFile::new(&path).load_initial_table(&self_id()).is_err());
    }

    #[test]
    fn test_static_seeds_skip_self() {
        let seeds = StaticSeeds::new(vec![
            "127.0.0.1:7000".parse().unwrap(),
            "127.0.0.1:7001".parse().unwrap(),
        ]);

        let table = seeds.load_initial_table(&self_id()).unwrap();

        assert_eq!(table.len(), 1);
        let entry = table[&NodeId("127.0.0.1:7001".to_string())];
        assert_eq!(entry, MembershipEntry::alive(1, 0));
    }
}
