//! Keymesh membership - gossip-driven peer directory
//!
//! Each node learns of others by pair-wise exchanges and maintains a
//! local liveness view:
//! - Greet: first contact from a joining node
//! - Gossip worker: one randomized pair-wise exchange per tick
//! - Sleeper: marks peers dead after a silence timeout
//!
//! The manager owns the per-node counter that the replication layer
//! draws insertion tags from.

pub mod manager;

pub use manager::{MembershipConfig, MembershipManager};

use keymesh_proto::NodeId;
use thiserror::Error;

/// Errors surfaced by the membership endpoints.
#[derive(Error, Debug)]
pub enum MembershipError {
    #[error("peer already member with requested id {0}")]
    AlreadyKnown(NodeId),
}
