//! The membership manager: peer directory, gossip worker and sleeper.
//!
//! Locking discipline: one reader-writer lock guards all mutable state.
//! Outbound rounds snapshot what they need under the read lock, drop it,
//! issue the RPC, then re-acquire the write lock to merge the response.
//! No lock is ever held across a network call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tonic::transport::Channel;
use tonic::Request;

use keymesh_proto::client::connect_lazy;
use keymesh_proto::constants;
use keymesh_proto::convert::validate_uri;
use keymesh_proto::pb;
use keymesh_proto::pb::cluster_client::ClusterClient;
use keymesh_proto::{GossipUpdate, NodeId, Peer, ProtoError};

use crate::MembershipError;

/// Tunable intervals for the membership background tasks.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Worker tick: greet attempt while uninitialized, else gossip round.
    pub gossip_interval: Duration,
    /// Interval between dead-peer scans.
    pub sleeper_interval: Duration,
    /// A peer not seen for this long is presumed dead.
    pub peer_timeout: Duration,
    /// Per-call deadline for outbound RPCs.
    pub rpc_timeout: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(constants::GOSSIP_INTERVAL_MS),
            sleeper_interval: Duration::from_secs(constants::SLEEPER_INTERVAL_SECS),
            peer_timeout: Duration::from_secs(constants::PEER_TIMEOUT_SECS),
            rpc_timeout: Duration::from_secs(constants::RPC_TIMEOUT_SECS),
        }
    }
}

/// Mutable membership state, guarded by the manager's single lock.
struct Directory {
    /// Per-node monotone counter; minted values are 1-based so 0 can
    /// mean "never observed" in version vectors.
    counter: u64,
    /// Every peer ever heard of. Records are never removed.
    peers: Vec<Peer>,
    /// Cached clients, one per peer. Channels are cheap to clone and
    /// safe to invoke concurrently.
    clients: HashMap<NodeId, ClusterClient<Channel>>,
}

/// Peer directory, counter and liveness view for one node.
///
/// Constructed once per process and shared by reference. The replication
/// layer holds an `Arc` to it for counter bumps and live-peer selection;
/// membership knows nothing about replication.
pub struct MembershipManager {
    id: NodeId,
    uri: String,
    contact_uri: Option<String>,
    initialized: AtomicBool,
    config: MembershipConfig,
    directory: RwLock<Directory>,
}

impl MembershipManager {
    /// Create a manager. With no contact URI the node is a seed and is
    /// initialized immediately; otherwise a greeter keeps trying the
    /// contact until it answers.
    pub fn new(uri: String, contact_uri: Option<String>, config: MembershipConfig) -> Arc<Self> {
        let id = NodeId::generate();
        let initialized = AtomicBool::new(contact_uri.is_none());

        tracing::info!(id = %id, uri = %uri, "Keymesh node starting");

        Arc::new(Self {
            id,
            uri,
            contact_uri,
            initialized,
            config,
            directory: RwLock::new(Directory {
                counter: 0,
                peers: Vec::new(),
                clients: HashMap::new(),
            }),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether this node has joined the cluster (seeds start joined).
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Spawn the worker and sleeper. Both run for the process lifetime.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(mgr.config.gossip_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut greet_failure_logged = false;
            loop {
                tick.tick().await;
                if mgr.is_initialized() {
                    mgr.gossip_round().await;
                } else {
                    mgr.greet_round(&mut greet_failure_logged).await;
                }
            }
        });

        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(mgr.config.sleeper_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                mgr.mark_timed_out_peers().await;
            }
        });
    }

    // -- Worker rounds --

    /// One greet attempt against the configured contact URI.
    async fn greet_round(&self, failure_logged: &mut bool) {
        let Some(contact) = self.contact_uri.as_deref() else {
            return;
        };

        // Temporary client; the contact shows up as a regular peer with a
        // cached client once gossip starts.
        let mut client = match connect_lazy(contact, self.config.rpc_timeout) {
            Ok(client) => client,
            Err(error) => {
                if !*failure_logged {
                    tracing::warn!(uri = %contact, error = %error, "Invalid contact uri");
                    *failure_logged = true;
                }
                return;
            }
        };

        let req = pb::GreetMsg {
            id: self.id.to_string(),
            uri: self.uri.clone(),
        };

        match client.greet(Request::new(req)).await {
            Ok(resp) => {
                let msg = resp.into_inner();
                let peer = match greet_reply_to_peer(&msg) {
                    Ok(peer) => peer,
                    Err(error) => {
                        tracing::warn!(uri = %contact, error = %error, "Malformed greet reply");
                        return;
                    }
                };

                {
                    let mut dir = self.directory.write().await;
                    if !dir.peers.iter().any(|p| p.id == peer.id) {
                        dir.peers.push(peer.clone());
                    }
                }
                self.initialized.store(true, Ordering::SeqCst);

                tracing::info!(
                    peer = %peer.id,
                    uri = %peer.uri,
                    "Contacted seed peer successfully, now initialized"
                );
            }
            Err(status) => {
                if !*failure_logged {
                    tracing::warn!(uri = %contact, error = %status, "Couldn't contact seed peer");
                    *failure_logged = true;
                } else {
                    tracing::debug!(uri = %contact, error = %status, "Seed peer still unreachable");
                }
            }
        }
    }

    /// One gossip round: pick a random live peer, send it our view, merge
    /// whatever comes back.
    async fn gossip_round(&self) {
        let (target, cached, msg) = {
            let dir = self.directory.read().await;
            let live: Vec<&Peer> = dir.peers.iter().filter(|p| !p.dead).collect();
            let Some(target) = live.choose(&mut rand::thread_rng()).map(|p| (*p).clone()) else {
                return;
            };
            let peers = dir
                .peers
                .iter()
                .filter(|p| p.id != target.id)
                .map(pb::Peer::from)
                .collect();
            let msg = pb::GossipMsg {
                id: self.id.to_string(),
                uri: self.uri.clone(),
                // A node that has not mutated yet still must send a
                // non-zero counter.
                counter: dir.counter.max(1),
                peers,
            };
            let cached_client = dir.clients.get(&target.id).cloned();
            (target, cached_client, msg)
        };

        let mut client = match cached {
            Some(client) => client,
            None => match connect_lazy(&target.uri, self.config.rpc_timeout) {
                Ok(client) => {
                    let mut dir = self.directory.write().await;
                    dir.clients.insert(target.id, client.clone());
                    client
                }
                Err(error) => {
                    tracing::warn!(
                        peer = %target.id,
                        uri = %target.uri,
                        error = %error,
                        "Couldn't build client for peer"
                    );
                    return;
                }
            },
        };

        match client.gossip(Request::new(msg)).await {
            Ok(resp) => {
                let update = match GossipUpdate::try_from(resp.into_inner()) {
                    Ok(update) => update,
                    Err(error) => {
                        tracing::warn!(peer = %target.id, error = %error, "Malformed gossip reply");
                        return;
                    }
                };

                let mut dir = self.directory.write().await;
                if let Some(peer) = dir.peers.iter_mut().find(|p| p.id == target.id) {
                    peer.failures = 0;
                }
                let mismatch = update.id != target.id;
                self.merge_update(&mut dir, &update);
                if mismatch {
                    // A different node answered on this URI; stop gossiping
                    // to the record we thought lived there.
                    if let Some(peer) = dir.peers.iter_mut().find(|p| p.id == target.id) {
                        peer.dead = true;
                        tracing::warn!(
                            peer = %target.id,
                            reported = %update.id,
                            uri = %target.uri,
                            "Peer identity mismatch, marking dead"
                        );
                    }
                }
            }
            Err(status) => {
                let mut dir = self.directory.write().await;
                if let Some(peer) = dir.peers.iter_mut().find(|p| p.id == target.id) {
                    peer.failures += 1;
                    if peer.failures == 1 {
                        tracing::warn!(peer = %peer.id, error = %status, "Couldn't gossip to peer");
                    }
                }
            }
        }
    }

    /// Merge one gossip exchange into the directory. The sender itself
    /// counts as a freshly seen peer.
    fn merge_update(&self, dir: &mut Directory, update: &GossipUpdate) {
        let mut incoming = update.peers.clone();
        incoming.push(Peer {
            id: update.id,
            uri: update.uri.clone(),
            counter: update.counter,
            last_seen: Utc::now(),
            dead: false,
            failures: 0,
        });

        for peer in incoming {
            if peer.id == self.id {
                continue;
            }
            match dir.peers.iter_mut().find(|p| p.id == peer.id) {
                Some(existing) => {
                    existing.counter = existing.counter.max(peer.counter);
                    if peer.last_seen > existing.last_seen {
                        existing.last_seen = peer.last_seen;
                        if existing.dead {
                            // Fresh observation of a presumed-dead peer.
                            existing.dead = false;
                            existing.failures = 0;
                            tracing::info!(peer = %existing.id, "Presumed-dead peer seen again, reviving");
                        }
                    }
                }
                None => dir.peers.push(peer),
            }
        }

        dir.counter = dir.counter.max(update.counter);
    }

    // -- Endpoints (server side) --

    /// First contact from a joining node. A duplicate id is rejected
    /// whether the existing record is alive or dead, so the directory
    /// never holds two records for one id.
    pub async fn greet_endpoint(
        &self,
        id: NodeId,
        uri: String,
    ) -> Result<(NodeId, String), MembershipError> {
        let mut dir = self.directory.write().await;

        if dir.peers.iter().any(|p| p.id == id) {
            tracing::warn!(peer = %id, "Duplicate peer tried to join cluster");
            return Err(MembershipError::AlreadyKnown(id));
        }

        dir.peers.push(Peer::first_contact(id, uri.clone()));
        tracing::info!(peer = %id, uri = %uri, "Greeted by new peer");

        Ok((self.id, self.uri.clone()))
    }

    /// Pair-wise exchange, server side. The reply carries the peer list
    /// captured before the merge, so the caller also learns about peers
    /// it did not send.
    pub async fn gossip_endpoint(&self, update: GossipUpdate) -> GossipUpdate {
        let mut dir = self.directory.write().await;
        let before = dir.peers.clone();
        self.merge_update(&mut dir, &update);
        GossipUpdate {
            id: self.id,
            uri: self.uri.clone(),
            counter: dir.counter.max(1),
            peers: before,
        }
    }

    // -- Operations for other components --

    /// A uniformly random live peer, value-copied so the caller can use
    /// it after the lock is released.
    pub async fn get_live_peer(&self) -> Option<Peer> {
        let dir = self.directory.read().await;
        let live: Vec<&Peer> = dir.peers.iter().filter(|p| !p.dead).collect();
        live.choose(&mut rand::thread_rng()).map(|p| (*p).clone())
    }

    /// Bump the local counter and return the post-increment value. The
    /// first value ever minted is 1.
    pub async fn inc_counter(&self) -> u64 {
        let mut dir = self.directory.write().await;
        dir.counter += 1;
        dir.counter
    }

    pub async fn counter(&self) -> u64 {
        self.directory.read().await.counter
    }

    /// Value copy of the current peer list.
    pub async fn peers_snapshot(&self) -> Vec<Peer> {
        self.directory.read().await.peers.clone()
    }

    // -- Sleeper --

    /// Mark peers unseen within the timeout as presumed dead.
    pub async fn mark_timed_out_peers(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::milliseconds(self.config.peer_timeout.as_millis() as i64);
        let mut dir = self.directory.write().await;
        for peer in dir.peers.iter_mut() {
            if !peer.dead && peer.last_seen < cutoff {
                peer.dead = true;
                tracing::info!(
                    peer = %peer.id,
                    uri = %peer.uri,
                    "Peer not seen within timeout, presuming dead"
                );
            }
        }
    }

    /// Dump the peer table through debug logging: self row, then alive,
    /// then presumed-dead.
    pub async fn log_peer_table(&self) {
        let dir = self.directory.read().await;

        tracing::debug!(id = %self.id, uri = %self.uri, counter = dir.counter, "Self");

        tracing::debug!("Alive");
        for peer in dir.peers.iter().filter(|p| !p.dead) {
            tracing::debug!(
                peer = %peer.id,
                uri = %peer.uri,
                counter = peer.counter,
                last_seen_secs = (Utc::now() - peer.last_seen).num_seconds(),
                failures = peer.failures,
                "|--Peer"
            );
        }

        tracing::debug!("Presumed-dead");
        for peer in dir.peers.iter().filter(|p| p.dead) {
            tracing::debug!(
                peer = %peer.id,
                uri = %peer.uri,
                counter = peer.counter,
                last_seen_secs = (Utc::now() - peer.last_seen).num_seconds(),
                failures = peer.failures,
                "|--Peer"
            );
        }
    }
}

/// Parse a greet reply into a first-contact peer record.
fn greet_reply_to_peer(msg: &pb::GreetMsg) -> Result<Peer, ProtoError> {
    let id = NodeId::parse(&msg.id)?;
    validate_uri(&msg.uri)?;
    Ok(Peer::first_contact(id, msg.uri.clone()))
}
