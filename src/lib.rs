//! Gossip Membership Library
//!
//! Decentralized cluster membership and failure detection over UDP. The binary
//! (`main.rs`) wraps it with a command-line front end and an HTTP control plane.
//!
//! ## Architecture
//! - **`membership::table`**: the per-node membership table and its merge rules.
//! - **`membership::detector`** / **`membership::suspicion`**: probe timeouts and the
//!   optional grace period before a peer is declared failed.
//! - **`membership::gossip`**: anti-entropy fan-out of the table.
//! - **`membership::engine`**: the single owner of all protocol state.
//! - **`membership::service`**: the node agent running the receive, probe, sweep and
//!   gossip loops around the engine.

pub mod membership;
