//! Typed identifiers and peer records.
//!
//! `NodeId` and `Tag` are the two identifiers that cross the wire as
//! strings. Both are parsed at the conversion boundary and carried as
//! values everywhere else, so a malformed identifier past that boundary
//! is a programmer error rather than an expected failure mode.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ProtoError;

/// Unique identifier for a node, generated at startup.
///
/// Wire form is the canonical 36-character hyphenated UUID; inside tags it
/// appears as the 32-character simple hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the 36-character hyphenated wire form.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.len() != 36 {
            return Err(ProtoError::InvalidNodeId(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProtoError::InvalidNodeId(s.to_string()))
    }

    /// 32-character simple hex form used inside tags.
    pub fn tag_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A single insertion event: `(origin node, counter)`.
///
/// The canonical wire encoding is the 32-hex node id concatenated with the
/// 16-hex big-endian counter. Field order matters: the derived ordering
/// (node bytes, then counter) is exactly the lexicographic ordering of that
/// encoding, so replicas traverse tag sets identically on both sides of a
/// merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub node: NodeId,
    pub counter: u64,
}

/// Canonical tag encoding length: 32 hex chars of node id + 16 of counter.
const TAG_HEX_LEN: usize = 48;

impl Tag {
    pub fn new(node: NodeId, counter: u64) -> Self {
        Self { node, counter }
    }

    /// Canonical 48-character hex encoding.
    pub fn encode(&self) -> String {
        format!("{}{:016x}", self.node.tag_hex(), self.counter)
    }

    /// Parse the canonical encoding. Only called at the wire boundary.
    pub fn decode(s: &str) -> Result<Self, ProtoError> {
        if s.len() != TAG_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtoError::InvalidTag(s.to_string()));
        }
        let node = Uuid::try_parse(&s[..32])
            .map(NodeId)
            .map_err(|_| ProtoError::InvalidTag(s.to_string()))?;
        let counter = u64::from_str_radix(&s[32..], 16)
            .map_err(|_| ProtoError::InvalidTag(s.to_string()))?;
        Ok(Self { node, counter })
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// A remote node known to the local node.
///
/// Records are born on first contact and live for the process; the only
/// state transitions are `alive -> dead` (timeout or identity mismatch)
/// and back when a fresh observation arrives. `failures` counts the
/// current streak of outbound gossip errors and never crosses the wire.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: NodeId,
    pub uri: String,
    pub counter: u64,
    pub last_seen: DateTime<Utc>,
    pub dead: bool,
    pub failures: u32,
}

impl Peer {
    /// Record for a peer we just heard from for the first time.
    pub fn first_contact(id: NodeId, uri: String) -> Self {
        Self {
            id,
            uri,
            counter: 1,
            last_seen: Utc::now(),
            dead: false,
            failures: 0,
        }
    }
}

/// Domain form of one gossip exchange: the sender's identity, counter and
/// peer list. Used both for inbound merges and outbound replies.
#[derive(Debug, Clone)]
pub struct GossipUpdate {
    pub id: NodeId,
    pub uri: String,
    pub counter: u64,
    pub peers: Vec<Peer>,
}
