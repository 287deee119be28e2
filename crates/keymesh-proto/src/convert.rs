//! Wire/domain conversions.
//!
//! Inbound conversions are the validation boundary: ids must parse as
//! UUIDs, URIs as RFC3986, counters must be non-zero and timestamps
//! present and in range. Handlers map a failed conversion to an
//! invalid-argument status before anything reaches a manager.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::ProtoError;
use crate::pb;
use crate::types::{GossipUpdate, NodeId, Peer};

/// Check that `uri` is an absolute RFC3986 URI (scheme + authority).
pub fn validate_uri(uri: &str) -> Result<(), ProtoError> {
    let parsed: http::Uri = uri
        .parse()
        .map_err(|_| ProtoError::InvalidUri(uri.to_string()))?;
    if parsed.scheme().is_none() || parsed.authority().is_none() {
        return Err(ProtoError::InvalidUri(uri.to_string()));
    }
    Ok(())
}

pub fn to_wire_timestamp(dt: DateTime<Utc>) -> pb::Timestamp {
    pb::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

pub fn from_wire_timestamp(ts: &pb::Timestamp) -> Result<DateTime<Utc>, ProtoError> {
    DateTime::from_timestamp(ts.seconds, ts.nanos as u32)
        .ok_or(ProtoError::InvalidTimestamp(ts.seconds))
}

/// Version vector to its wire form (NodeId strings).
pub fn vector_to_wire(vector: &HashMap<NodeId, u64>) -> HashMap<String, u64> {
    vector.iter().map(|(id, c)| (id.to_string(), *c)).collect()
}

/// Parse a wire version vector. Entries must have valid ids and non-zero
/// counters; 0 means "never observed" and is expressed by absence.
pub fn vector_from_wire(vector: &HashMap<String, u64>) -> Result<HashMap<NodeId, u64>, ProtoError> {
    let mut out = HashMap::with_capacity(vector.len());
    for (id, counter) in vector {
        if *counter == 0 {
            return Err(ProtoError::ZeroCounter);
        }
        out.insert(NodeId::parse(id)?, *counter);
    }
    Ok(out)
}

impl From<&Peer> for pb::Peer {
    fn from(peer: &Peer) -> Self {
        pb::Peer {
            id: peer.id.to_string(),
            uri: peer.uri.clone(),
            counter: peer.counter,
            lastseen: Some(to_wire_timestamp(peer.last_seen)),
            dead: peer.dead,
        }
    }
}

impl TryFrom<&pb::Peer> for Peer {
    type Error = ProtoError;

    fn try_from(peer: &pb::Peer) -> Result<Self, Self::Error> {
        let id = NodeId::parse(&peer.id)?;
        validate_uri(&peer.uri)?;
        if peer.counter == 0 {
            return Err(ProtoError::ZeroCounter);
        }
        let lastseen = peer.lastseen.as_ref().ok_or(ProtoError::MissingTimestamp)?;
        Ok(Peer {
            id,
            uri: peer.uri.clone(),
            counter: peer.counter,
            last_seen: from_wire_timestamp(lastseen)?,
            dead: peer.dead,
            failures: 0,
        })
    }
}

impl From<&GossipUpdate> for pb::GossipMsg {
    fn from(update: &GossipUpdate) -> Self {
        pb::GossipMsg {
            id: update.id.to_string(),
            uri: update.uri.clone(),
            counter: update.counter,
            peers: update.peers.iter().map(pb::Peer::from).collect(),
        }
    }
}

impl TryFrom<pb::GossipMsg> for GossipUpdate {
    type Error = ProtoError;

    fn try_from(msg: pb::GossipMsg) -> Result<Self, Self::Error> {
        let id = NodeId::parse(&msg.id)?;
        validate_uri(&msg.uri)?;
        if msg.counter == 0 {
            return Err(ProtoError::ZeroCounter);
        }
        let peers = msg
            .peers
            .iter()
            .map(Peer::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GossipUpdate {
            id,
            uri: msg.uri,
            counter: msg.counter,
            peers,
        })
    }
}
