//! Wire Protocol
//!
//! One JSON object per UDP datagram, tagged by its `type` field:
//!
//! - `{"type":"ping","sequence":7}`
//! - `{"type":"ack","sequence":7}`
//! - `{"type":"gossip","table":{"10.0.0.1:7777":{"status":"alive","incarnation":1,"lastUpdated":0}}}`
//!
//! Decoding validates the tag and every node id before a message reaches the
//! protocol engine, so handlers never see half-understood input.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

use super::types::TableSnapshot;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const KNOWN_TYPES: [&str; 3] = ["ping", "ack", "gossip"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Ping { sequence: u64 },
    Ack { sequence: u64 },
    Gossip { table: TableSnapshot },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("message has no `type` tag")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("malformed `{kind}` message: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("gossip table contains invalid node id `{0}`")]
    InvalidNodeId(String),

    #[error("encoded message is {0} bytes, larger than a datagram")]
    Oversized(usize),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Ack { .. } => "ack",
            Message::Gossip { .. } => "gossip",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = serde_json::to_vec(self).map_err(ProtocolError::Encode)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(ProtocolError::InvalidJson)?;

        let kind = match value.get("type") {
            Some(serde_json::Value::String(kind)) => kind.clone(),
            Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
            None => return Err(ProtocolError::MissingType),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        let message: Message = serde_json::from_value(value)
            .map_err(|source| ProtocolError::Malformed { kind, source })?;

        if let Message::Gossip { table } = &message
            && let Some(bad) = table.keys().find(|id| id.0.parse::<SocketAddr>().is_err())
        {
            return Err(ProtocolError::InvalidNodeId(bad.0.clone()));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::types::{MemberStatus, MembershipEntry, NodeId};

    #[test]
    fn test_decode_ping_and_ack() {
        let ping = Message::decode(br#"{"type":"ping","sequence":42}"#).unwrap();
        assert_eq!(ping, Message::Ping { sequence: 42 });

        let ack = Message::decode(br#"{"type":"ack","sequence":42}"#).unwrap();
        assert_eq!(ack, Message::Ack { sequence: 42 });
    }

    #[test]
    fn test_decode_gossip_table() {
        let raw = br#"{"type":"gossip","table":{
            "10.0.0.1:7777":{"status":"alive","incarnation":3,"lastUpdated":1000},
            "10.0.0.2:7777":{"status":"left","incarnation":5,"lastUpdated":2000}
        }}"#;

        let Message::Gossip { table } = Message::decode(raw).unwrap() else {
            panic!("Wrong message type");
        };

        assert_eq!(table.len(), 2);
        let left = table[&NodeId("10.0.0.2:7777".to_string())];
        assert_eq!(left.status, MemberStatus::Left);
        assert_eq!(left.incarnation, 5);
    }

    #[test]
    fn test_encode_uses_type_tag() {
        let mut table = TableSnapshot::new();
        table.insert(
            NodeId("10.0.0.1:7777".to_string()),
            MembershipEntry::alive(1, 0),
        );

        let bytes = Message::Gossip { table }.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["type"], "gossip");
        assert_eq!(value["table"]["10.0.0.1:7777"]["status"], "alive");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = Message::decode(br#"{"type":"grep","pattern":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(kind) if kind == "grep"));
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = Message::decode(br#"{"sequence":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = Message::decode(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_malformed_fields_are_rejected() {
        let err = Message::decode(br#"{"type":"ping","sequence":"seven"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { kind, .. } if kind == "ping"));

        let err = Message::decode(
            br#"{"type":"gossip","table":{"10.0.0.1:7777":{"status":"zombie","incarnation":1,"lastUpdated":0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_node_id_is_rejected() {
        let err = Message::decode(
            br#"{"type":"gossip","table":{"somehost":{"status":"alive","incarnation":1,"lastUpdated":0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidNodeId(id) if id == "somehost"));
    }

    #[test]
    fn test_oversized_gossip_is_refused() {
        let table = (0..2_000u16)
            .map(|i| {
                (
                    NodeId(format!("10.{}.{}.1:7777", i / 250, i % 250)),
                    MembershipEntry::alive(u64::from(i), 1_700_000_000_000),
                )
            })
            .collect();

        let err = Message::Gossip { table }.encode().unwrap_err();
        assert!(matches!(err, ProtocolError::Oversized(_)));
    }
}
