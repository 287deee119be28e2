//! Keymesh state - OR-Set CRDT and delta replication
//!
//! The replicated state is an observed-remove set of string keys:
//! - `OrSet`: tagged adds, tombstoned removes, order-independent merge,
//!   delta extraction against a version vector
//! - `ReplicationManager`: own and per-peer version vectors, the pull
//!   loop, and the serving side of the Replicate exchange
//!
//! Convergence needs no coordination: repeated pair-wise exchanges plus
//! the merge's commutativity are enough, whatever the message ordering.

pub mod orset;
pub mod replication;

pub use orset::OrSet;
pub use replication::{ReplicationConfig, ReplicationManager};
