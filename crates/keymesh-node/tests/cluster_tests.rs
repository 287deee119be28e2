//! End-to-end cluster tests: real managers served over tonic on ephemeral
//! loopback ports.
//!
//! Verifies:
//! - Seed and joiner discover each other through greet + gossip
//! - An insert on one node becomes visible on the others via pull rounds
//! - Duplicate greet is rejected with ALREADY_EXISTS
//! - An identity mismatch on a gossiped URI demotes the stale record

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request};

use keymesh_membership::{MembershipConfig, MembershipManager};
use keymesh_node::rpc_server::ClusterService;
use keymesh_proto::client::connect_lazy;
use keymesh_proto::pb;
use keymesh_proto::pb::cluster_server::ClusterServer;
use keymesh_proto::NodeId;
use keymesh_state::{ReplicationConfig, ReplicationManager};

const CONVERGENCE_BUDGET: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(25);

struct TestNode {
    membership: Arc<MembershipManager>,
    replication: Arc<ReplicationManager>,
    uri: String,
}

/// Start a full node (managers + background tasks + served endpoints) on
/// an ephemeral loopback port. Intervals are tightened so tests converge
/// quickly.
async fn start_node(contact: Option<String>) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let uri = format!("http://{addr}");

    let membership = MembershipManager::new(
        uri.clone(),
        contact,
        MembershipConfig {
            gossip_interval: Duration::from_millis(20),
            sleeper_interval: Duration::from_millis(500),
            peer_timeout: Duration::from_secs(15),
            rpc_timeout: Duration::from_secs(2),
        },
    );
    let replication = ReplicationManager::new(
        Arc::clone(&membership),
        ReplicationConfig {
            pull_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_secs(2),
        },
    );

    membership.spawn_background_tasks();
    replication.spawn_background_tasks();

    let service = ClusterService::new(Arc::clone(&membership), Arc::clone(&replication));
    tokio::spawn(async move {
        Server::builder()
            .add_service(ClusterServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });

    TestNode {
        membership,
        replication,
        uri,
    }
}

async fn knows_peer(node: &TestNode, other: &TestNode) -> bool {
    node.membership
        .peers_snapshot()
        .await
        .iter()
        .any(|p| p.id == other.membership.id() && !p.dead)
}

#[tokio::test]
async fn seed_and_joiner_learn_each_other() {
    let seed = start_node(None).await;
    let joiner = start_node(Some(seed.uri.clone())).await;

    let deadline = tokio::time::Instant::now() + CONVERGENCE_BUDGET;
    while !(joiner.membership.is_initialized()
        && knows_peer(&seed, &joiner).await
        && knows_peer(&joiner, &seed).await)
    {
        assert!(
            tokio::time::Instant::now() < deadline,
            "membership never converged"
        );
        tokio::time::sleep(POLL).await;
    }
}

#[tokio::test]
async fn insert_on_joiner_reaches_seed() {
    let seed = start_node(None).await;
    let joiner = start_node(Some(seed.uri.clone())).await;

    let deadline = tokio::time::Instant::now() + CONVERGENCE_BUDGET;
    while !joiner.membership.is_initialized() {
        assert!(tokio::time::Instant::now() < deadline, "joiner never joined");
        tokio::time::sleep(POLL).await;
    }

    joiner.replication.set_insert("x").await;
    assert!(joiner.replication.set_has("x").await);

    while !seed.replication.set_has("x").await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "insert never reached the seed"
        );
        tokio::time::sleep(POLL).await;
    }
}

#[tokio::test]
async fn observed_tags_are_not_resent_and_fresh_tags_revive_keys() {
    let seed = start_node(None).await;
    let joiner = start_node(Some(seed.uri.clone())).await;

    let deadline = tokio::time::Instant::now() + CONVERGENCE_BUDGET;

    seed.replication.set_insert("apple").await;
    while !joiner.replication.set_has("apple").await {
        assert!(tokio::time::Instant::now() < deadline, "insert never spread");
        tokio::time::sleep(POLL).await;
    }

    // The joiner tombstones the tag it observed. Its vector already
    // covers the seed's tag, so subsequent pulls must not re-add the key.
    joiner.replication.set_remove("apple").await;
    assert!(!joiner.replication.set_has("apple").await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        !joiner.replication.set_has("apple").await,
        "already-observed tag must not travel again"
    );

    // A fresh tag revives the key on the replica that removed it.
    joiner.replication.set_insert("apple").await;
    assert!(joiner.replication.set_has("apple").await);
    assert!(seed.replication.set_has("apple").await);
}

#[tokio::test]
async fn three_nodes_converge_on_all_keys() {
    let seed = start_node(None).await;
    let b = start_node(Some(seed.uri.clone())).await;
    let c = start_node(Some(seed.uri.clone())).await;

    seed.replication.set_insert("from-seed").await;
    b.replication.set_insert("from-b").await;
    c.replication.set_insert("from-c").await;

    let expected = vec![
        "from-b".to_string(),
        "from-c".to_string(),
        "from-seed".to_string(),
    ];

    let deadline = tokio::time::Instant::now() + CONVERGENCE_BUDGET;
    for node in [&seed, &b, &c] {
        while node.replication.items().await != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "cluster never converged on all keys"
            );
            tokio::time::sleep(POLL).await;
        }
    }
}

#[tokio::test]
async fn duplicate_greet_is_rejected_with_already_exists() {
    let seed = start_node(None).await;
    let mut client = connect_lazy(&seed.uri, Duration::from_secs(2)).expect("client");

    let msg = pb::GreetMsg {
        id: NodeId::generate().to_string(),
        uri: "http://127.0.0.1:1".to_string(),
    };

    client
        .greet(Request::new(msg.clone()))
        .await
        .expect("first greet succeeds");

    let status = client
        .greet(Request::new(msg))
        .await
        .expect_err("second greet fails");
    assert_eq!(status.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn malformed_messages_are_rejected_before_dispatch() {
    let seed = start_node(None).await;
    let mut client = connect_lazy(&seed.uri, Duration::from_secs(2)).expect("client");

    let status = client
        .greet(Request::new(pb::GreetMsg {
            id: "not-a-uuid".to_string(),
            uri: "http://127.0.0.1:1".to_string(),
        }))
        .await
        .expect_err("bad id rejected");
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .greet(Request::new(pb::GreetMsg {
            id: NodeId::generate().to_string(),
            uri: "no scheme".to_string(),
        }))
        .await
        .expect_err("bad uri rejected");
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .gossip(Request::new(pb::GossipMsg {
            id: NodeId::generate().to_string(),
            uri: "http://127.0.0.1:1".to_string(),
            counter: 0,
            peers: Vec::new(),
        }))
        .await
        .expect_err("zero counter rejected");
    assert_eq!(status.code(), Code::InvalidArgument);

    assert!(seed.membership.peers_snapshot().await.is_empty());
}

#[tokio::test]
async fn identity_mismatch_demotes_stale_record() {
    // `seed` is told that the node at `imposter.uri` has a fabricated id.
    // Gossiping there returns the real id, so the fabricated record must
    // be marked dead.
    let seed = start_node(None).await;
    let imposter = start_node(None).await;
    let fabricated = NodeId::generate();

    let mut client = connect_lazy(&seed.uri, Duration::from_secs(2)).expect("client");
    let sender = NodeId::generate();
    client
        .gossip(Request::new(pb::GossipMsg {
            id: sender.to_string(),
            uri: "http://127.0.0.1:1".to_string(),
            counter: 1,
            peers: vec![pb::Peer {
                id: fabricated.to_string(),
                uri: imposter.uri.clone(),
                counter: 1,
                lastseen: Some(keymesh_proto::convert::to_wire_timestamp(
                    chrono::Utc::now(),
                )),
                dead: false,
            }],
        }))
        .await
        .expect("gossip accepted");

    let deadline = tokio::time::Instant::now() + CONVERGENCE_BUDGET;
    loop {
        let peers = seed.membership.peers_snapshot().await;
        if peers
            .iter()
            .any(|p| p.id == fabricated && p.dead)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "stale record never demoted"
        );
        tokio::time::sleep(POLL).await;
    }
}
