//! The replication manager: version vectors, pull loop and the serving
//! side of the Replicate exchange.
//!
//! Same locking discipline as membership: snapshot under the read lock,
//! drop it, issue the RPC, re-acquire the write lock to merge. Counter
//! bumps go through the membership manager so tags and gossip share one
//! monotone sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tonic::transport::Channel;
use tonic::Request;

use keymesh_membership::MembershipManager;
use keymesh_proto::client::connect_lazy;
use keymesh_proto::constants;
use keymesh_proto::convert::{vector_from_wire, vector_to_wire};
use keymesh_proto::pb;
use keymesh_proto::pb::cluster_client::ClusterClient;
use keymesh_proto::{NodeId, Tag};

use crate::orset::OrSet;

/// Tunable intervals for the replication background task.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Interval between replication pulls.
    pub pull_interval: Duration,
    /// Per-call deadline for outbound RPCs.
    pub rpc_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(constants::PULL_INTERVAL_SECS),
            rpc_timeout: Duration::from_secs(constants::RPC_TIMEOUT_SECS),
        }
    }
}

/// Mutable replication state, guarded by the manager's single lock.
struct Replica {
    /// Highest counter locally observed per origin, self included.
    vector: HashMap<NodeId, u64>,
    /// For each peer, the vector it most recently reported to us. Drives
    /// delta extraction on the serving side.
    peer_vectors: HashMap<NodeId, HashMap<NodeId, u64>>,
    set: OrSet,
    clients: HashMap<NodeId, ClusterClient<Channel>>,
}

/// Replicated keyed-set state for one node.
///
/// Holds a reference to the membership manager for counter bumps and
/// live-peer selection; the reference is one-way.
pub struct ReplicationManager {
    membership: Arc<MembershipManager>,
    config: ReplicationConfig,
    replica: RwLock<Replica>,
}

impl ReplicationManager {
    pub fn new(membership: Arc<MembershipManager>, config: ReplicationConfig) -> Arc<Self> {
        Arc::new(Self {
            membership,
            config,
            replica: RwLock::new(Replica {
                vector: HashMap::new(),
                peer_vectors: HashMap::new(),
                set: OrSet::new(),
                clients: HashMap::new(),
            }),
        })
    }

    /// Spawn the puller. Runs for the process lifetime.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(mgr.config.pull_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                mgr.pull_round().await;
            }
        });
    }

    // -- Local mutations and queries --

    /// Insert `key`, minting a fresh tag from the shared counter.
    pub async fn set_insert(&self, key: &str) {
        let counter = self.membership.inc_counter().await;
        let tag = Tag::new(self.membership.id(), counter);

        let mut rep = self.replica.write().await;
        rep.set.add(key, tag);
        advance(&mut rep.vector, tag.node, counter);
    }

    /// Remove `key`, tombstoning every locally observed tag. The counter
    /// is bumped so the vector signals activity, but no tag is minted.
    pub async fn set_remove(&self, key: &str) {
        let counter = self.membership.inc_counter().await;
        let id = self.membership.id();

        let mut rep = self.replica.write().await;
        rep.set.remove(key);
        advance(&mut rep.vector, id, counter);
    }

    pub async fn set_has(&self, key: &str) -> bool {
        self.replica.read().await.set.contains(key)
    }

    /// Every key currently present, sorted for stable presentation.
    pub async fn items(&self) -> Vec<String> {
        let mut items = self.replica.read().await.set.items();
        items.sort();
        items
    }

    /// Value copy of the own version vector.
    pub async fn vector_snapshot(&self) -> HashMap<NodeId, u64> {
        self.replica.read().await.vector.clone()
    }

    /// Render the current set through debug logging.
    pub async fn log_set(&self) {
        let rep = self.replica.read().await;
        tracing::debug!(set = %rep.set, "Replicated set");
    }

    // -- Pull loop --

    /// One pull: send our vector to a random live peer, merge the delta
    /// and vector that come back.
    async fn pull_round(&self) {
        let Some(peer) = self.membership.get_live_peer().await else {
            return;
        };

        let cached = self.replica.read().await.clients.get(&peer.id).cloned();
        let mut client = match cached {
            Some(client) => client,
            None => match connect_lazy(&peer.uri, self.config.rpc_timeout) {
                Ok(client) => {
                    let mut rep = self.replica.write().await;
                    rep.clients.insert(peer.id, client.clone());
                    client
                }
                Err(error) => {
                    tracing::warn!(
                        peer = %peer.id,
                        uri = %peer.uri,
                        error = %error,
                        "Couldn't build replication client"
                    );
                    return;
                }
            },
        };

        let req = {
            let rep = self.replica.read().await;
            pb::ReplReq {
                id: self.membership.id().to_string(),
                vector: vector_to_wire(&rep.vector),
            }
        };

        match client.replicate(Request::new(req)).await {
            Ok(resp) => {
                let resp = resp.into_inner();
                let delta = match resp.orset.as_ref().map(OrSet::try_from).transpose() {
                    Ok(delta) => delta.unwrap_or_default(),
                    Err(error) => {
                        tracing::warn!(peer = %peer.id, error = %error, "Malformed replication delta");
                        return;
                    }
                };
                let vector = match vector_from_wire(&resp.vector) {
                    Ok(vector) => vector,
                    Err(error) => {
                        tracing::warn!(peer = %peer.id, error = %error, "Malformed replication vector");
                        return;
                    }
                };

                let mut rep = self.replica.write().await;
                rep.set.merge(&delta);
                for (node, counter) in vector {
                    advance(&mut rep.vector, node, counter);
                }
                tracing::debug!(peer = %peer.id, "Merged replication response");
            }
            Err(status) => {
                tracing::warn!(peer = %peer.id, error = %status, "Couldn't replicate from peer");
            }
        }
    }

    // -- Endpoint (server side) --

    /// Record the caller's reported vector and hand back the tags it has
    /// not yet observed, plus a snapshot of our own vector.
    ///
    /// The caller's report is merged element-wise max into our recorded
    /// view: a caller's true vector is monotone within its process
    /// lifetime, so max only guards against reordered in-flight requests.
    pub async fn replicate_endpoint(
        &self,
        caller: NodeId,
        caller_vector: HashMap<NodeId, u64>,
    ) -> (OrSet, HashMap<NodeId, u64>) {
        let mut rep = self.replica.write().await;

        let mut view = rep.peer_vectors.remove(&caller).unwrap_or_default();
        for (node, counter) in caller_vector {
            let entry = view.entry(node).or_insert(0);
            *entry = (*entry).max(counter);
        }

        let delta = rep.set.diff(&view);
        let snapshot = rep.vector.clone();
        rep.peer_vectors.insert(caller, view);

        (delta, snapshot)
    }

    /// The vector `peer` most recently reported to us, if any.
    pub async fn peer_vector(&self, peer: NodeId) -> Option<HashMap<NodeId, u64>> {
        self.replica.read().await.peer_vectors.get(&peer).cloned()
    }
}

/// Advance a vector entry without ever regressing it.
fn advance(vector: &mut HashMap<NodeId, u64>, node: NodeId, counter: u64) {
    let entry = vector.entry(node).or_insert(0);
    *entry = (*entry).max(counter);
}
