//! Membership & Failure Detection Module
//!
//! Gossip-based membership for a small cluster of peers on an unreliable
//! datagram network. Every node keeps its own view of who is alive; there is
//! no coordinator.
//!
//! ## Core Mechanisms
//! - **Probing**: each round pings one random Alive peer; a missing ack marks it Failed,
//!   or Suspected when the suspicion sub-protocol is on.
//! - **Suspicion**: a suspected peer gets a grace period during which any direct contact
//!   or newer gossip refutes the suspicion.
//! - **Gossip**: the full table is pushed to a few random peers every round and merged by
//!   `(incarnation, lastUpdated)` on arrival.
//! - **Incarnation Numbers**: only a node raises its own incarnation, which is how it
//!   refutes false reports and how re-joins outrank an old Failed/Left entry.

pub mod audit;
pub mod config;
pub mod detector;
pub mod engine;
pub mod gossip;
pub mod handlers;
pub mod protocol;
pub mod seed;
pub mod service;
pub mod suspicion;
pub mod table;
pub mod transport;
pub mod types;
