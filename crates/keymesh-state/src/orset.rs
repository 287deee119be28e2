//! OR-Set CRDT (observed-remove set) of string keys.
//!
//! Each insertion mints a unique tag; a remove tombstones only the tags
//! the local replica has observed. A key is present while it has at
//! least one non-tombstoned tag, so a concurrent add always survives a
//! concurrent remove (add wins - the fresh tag is not in the remote
//! tombstone set).
//!
//! Tag sets are kept ordered so both sides of a merge traverse
//! identically, and so delta extraction walks new tags in canonical
//! order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use keymesh_proto::pb;
use keymesh_proto::{NodeId, ProtoError, Tag};

/// Observed-remove set.
///
/// Merge is commutative, associative and idempotent; all state is
/// monotone (tombstones are never collected).
#[derive(Debug, Clone, Default)]
pub struct OrSet {
    /// Key -> tags asserting its presence.
    adds: HashMap<String, BTreeSet<Tag>>,
    /// Observed-and-removed tags.
    removes: BTreeSet<Tag>,
}

impl OrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `tag` into the key's add bucket. Idempotent on duplicate
    /// `(key, tag)`.
    pub fn add(&mut self, key: &str, tag: Tag) {
        self.adds.entry(key.to_string()).or_default().insert(tag);
    }

    /// Tombstone every currently observed tag for `key`. The add buckets
    /// are left untouched; removing an unknown key is a no-op.
    pub fn remove(&mut self, key: &str) {
        if let Some(tags) = self.adds.get(key) {
            for tag in tags {
                self.removes.insert(*tag);
            }
        }
    }

    /// True while some tag asserts the key and is not tombstoned.
    pub fn contains(&self, key: &str) -> bool {
        self.adds
            .get(key)
            .is_some_and(|tags| tags.iter().any(|tag| !self.removes.contains(tag)))
    }

    /// Union the other replica's adds and removes into this one.
    pub fn merge(&mut self, other: &OrSet) {
        for (key, tags) in &other.adds {
            let bucket = self.adds.entry(key.clone()).or_default();
            for tag in tags {
                bucket.insert(*tag);
            }
        }
        for tag in &other.removes {
            self.removes.insert(*tag);
        }
    }

    /// Every key currently present.
    pub fn items(&self) -> Vec<String> {
        self.adds
            .iter()
            .filter(|(_, tags)| tags.iter().any(|tag| !self.removes.contains(tag)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Sub-set of tags the holder of `vector` has not yet observed: a tag
    /// `(origin, c)` is included iff `c > vector[origin]`, with an absent
    /// origin counting as 0. Add buckets that come up empty are omitted.
    pub fn diff(&self, vector: &HashMap<NodeId, u64>) -> OrSet {
        let unseen = |tag: &Tag| tag.counter > vector.get(&tag.node).copied().unwrap_or(0);

        let mut out = OrSet::new();
        for (key, tags) in &self.adds {
            let fresh: BTreeSet<Tag> = tags.iter().copied().filter(|t| unseen(t)).collect();
            if !fresh.is_empty() {
                out.adds.insert(key.clone(), fresh);
            }
        }
        out.removes = self.removes.iter().copied().filter(|t| unseen(t)).collect();
        out
    }

    /// Tags currently asserting `key`, if any.
    pub fn tags(&self, key: &str) -> Option<&BTreeSet<Tag>> {
        self.adds.get(key)
    }

    /// Tombstoned tags.
    pub fn removed_tags(&self) -> &BTreeSet<Tag> {
        &self.removes
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

impl fmt::Display for OrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OrSet")?;
        writeln!(f, "|--Adds:")?;
        let mut keys: Vec<&String> = self.adds.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "| |--{key}")?;
            for tag in &self.adds[key] {
                writeln!(f, "| |  |--{tag}")?;
            }
        }
        writeln!(f, "|--Removes:")?;
        for tag in &self.removes {
            writeln!(f, "| |--{tag}")?;
        }
        Ok(())
    }
}

impl From<&OrSet> for pb::OrSet {
    fn from(set: &OrSet) -> Self {
        let adds = set
            .adds
            .iter()
            .flat_map(|(key, tags)| {
                tags.iter().map(move |tag| pb::OrSetAdd {
                    key: key.clone(),
                    tag: tag.encode(),
                })
            })
            .collect();
        let removes = set
            .removes
            .iter()
            .map(|tag| pb::OrSetRemove { tag: tag.encode() })
            .collect();
        pb::OrSet { adds, removes }
    }
}

impl TryFrom<&pb::OrSet> for OrSet {
    type Error = ProtoError;

    fn try_from(wire: &pb::OrSet) -> Result<Self, Self::Error> {
        let mut set = OrSet::new();
        for entry in &wire.adds {
            if entry.key.is_empty() {
                return Err(ProtoError::EmptyKey);
            }
            set.add(&entry.key, Tag::decode(&entry.tag)?);
        }
        for entry in &wire.removes {
            set.removes.insert(Tag::decode(&entry.tag)?);
        }
        Ok(set)
    }
}
