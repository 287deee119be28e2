//! Keymesh wire protocol - schema, typed identifiers and boundary validation
//!
//! Shared by the membership and replication layers:
//! - Generated tonic stubs for the `keymesh.v1.Cluster` service
//! - `NodeId` and `Tag` newtypes with the canonical hex tag codec
//! - Wire/domain conversions that double as inbound validation
//! - Interval constants and the protocol error type
//!
//! Identifiers cross the wire as strings and are parsed exactly once, at
//! the conversion boundary. Everything behind that boundary works with
//! typed values.

pub mod client;
pub mod constants;
pub mod convert;
pub mod error;
pub mod types;

/// Generated protobuf/tonic code for `keymesh.v1`.
pub mod pb {
    tonic::include_proto!("keymesh.v1");
}

pub use error::ProtoError;
pub use types::{GossipUpdate, NodeId, Peer, Tag};
