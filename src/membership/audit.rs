//! Audit Log
//!
//! Append-only record of membership transitions. Recording is fire-and-forget:
//! callers hand the record to a channel and a background task does the I/O.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::types::{AuditAction, NodeId};

pub trait AuditLog: Send + Sync {
    fn record_transition(&self, node: &NodeId, action: AuditAction, incarnation: u64, timestamp: u64);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub node: NodeId,
    pub action: AuditAction,
    pub incarnation: u64,
    pub timestamp: u64,
}

impl AuditRecord {
    /// `2024-03-01 12:00:00 - Node: 10.0.0.2:7777 has failure (incarnation 3)`
    pub fn format_line(&self) -> String {
        let when = DateTime::from_timestamp_millis(self.timestamp as i64)
            .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.to_string());

        format!(
            "{} - Node: {} has {} (incarnation {})\n",
            when, self.node, self.action, self.incarnation
        )
    }
}

/// Appends one line per transition to a text file.
pub struct FileAuditLog {
    path: PathBuf,
    records: mpsc::UnboundedSender<AuditRecord>,
}

impl FileAuditLog {
    /// Opens (or creates) the log and spawns its writer task.
    pub async fn open(path: impl AsRef<Path>, truncate: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }

        let mut file = options
            .open(&path)
            .await
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        let log_name = path.display().to_string();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let line = record.format_line();
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::error!("Failed to write audit log {}: {}", log_name, e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    tracing::error!("Failed to flush audit log {}: {}", log_name, e);
                }
            }
        });

        Ok(Self { path, records: tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for FileAuditLog {
    fn record_transition(&self, node: &NodeId, action: AuditAction, incarnation: u64, timestamp: u64) {
        let record = AuditRecord {
            node: node.clone(),
            action,
            incarnation,
            timestamp,
        };

        if self.records.send(record).is_err() {
            tracing::warn!("Audit writer for {} is gone", self.path.display());
        }
    }
}

/// Discards every record.
pub struct NullAuditLog;

impl AuditLog for NullAuditLog {
    fn record_transition(&self, _: &NodeId, _: AuditAction, _: u64, _: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_line() {
        let record = AuditRecord {
            node: NodeId("10.0.0.2:7777".to_string()),
            action: AuditAction::Failure,
            incarnation: 3,
            timestamp: 1_700_000_000_000,
        };

        let line = record.format_line();

        assert!(line.ends_with(" - Node: 10.0.0.2:7777 has failure (incarnation 3)\n"));
        // "YYYY-MM-DD HH:MM:SS"
        assert_eq!(line.find(" - Node:"), Some(19));
    }

    #[tokio::test]
    async fn test_file_log_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membership.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        let log = FileAuditLog::open(&path, false).await.unwrap();
        log.record_transition(&NodeId("10.0.0.2:7777".to_string()), AuditAction::Joined, 1, 0);
        log.record_transition(&NodeId("10.0.0.3:7777".to_string()), AuditAction::Left, 2, 0);

        let mut contents = String::new();
        for _ in 0..50 {
            contents = std::fs::read_to_string(&path).unwrap();
            if contents.lines().count() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier line");
        assert!(lines[1].contains("10.0.0.2:7777 has joined"));
        assert!(lines[2].contains("10.0.0.3:7777 has left (incarnation 2)"));
    }

    #[tokio::test]
    async fn test_truncate_clears_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membership.log");
        std::fs::write(&path, "stale\n").unwrap();

        let _log = FileAuditLog::open(&path, true).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
