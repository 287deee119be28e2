//! The `keymesh.v1.Cluster` service implementation.
//!
//! Thin dispatch layer: every inbound message is validated and converted
//! to domain types here, before anything reaches a manager. Conversion
//! failures are rejected with an invalid-argument status; a duplicate
//! greet surfaces as already-exists.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use keymesh_membership::{MembershipError, MembershipManager};
use keymesh_proto::convert::{validate_uri, vector_from_wire, vector_to_wire};
use keymesh_proto::pb;
use keymesh_proto::pb::cluster_server::Cluster;
use keymesh_proto::{GossipUpdate, NodeId, ProtoError};
use keymesh_state::ReplicationManager;

/// Serves the three cluster endpoints and dispatches into the managers.
pub struct ClusterService {
    membership: Arc<MembershipManager>,
    replication: Arc<ReplicationManager>,
}

impl ClusterService {
    pub fn new(
        membership: Arc<MembershipManager>,
        replication: Arc<ReplicationManager>,
    ) -> Self {
        Self {
            membership,
            replication,
        }
    }
}

fn invalid(error: ProtoError) -> Status {
    Status::invalid_argument(error.to_string())
}

#[tonic::async_trait]
impl Cluster for ClusterService {
    async fn greet(
        &self,
        request: Request<pb::GreetMsg>,
    ) -> Result<Response<pb::GreetMsg>, Status> {
        let msg = request.into_inner();
        let id = NodeId::parse(&msg.id).map_err(invalid)?;
        validate_uri(&msg.uri).map_err(invalid)?;

        let (self_id, self_uri) = self
            .membership
            .greet_endpoint(id, msg.uri)
            .await
            .map_err(|error| match error {
                MembershipError::AlreadyKnown(_) => Status::already_exists(error.to_string()),
            })?;

        Ok(Response::new(pb::GreetMsg {
            id: self_id.to_string(),
            uri: self_uri,
        }))
    }

    async fn gossip(
        &self,
        request: Request<pb::GossipMsg>,
    ) -> Result<Response<pb::GossipMsg>, Status> {
        let update = GossipUpdate::try_from(request.into_inner()).map_err(invalid)?;
        let reply = self.membership.gossip_endpoint(update).await;
        Ok(Response::new(pb::GossipMsg::from(&reply)))
    }

    async fn replicate(
        &self,
        request: Request<pb::ReplReq>,
    ) -> Result<Response<pb::ReplResp>, Status> {
        let req = request.into_inner();
        let caller = NodeId::parse(&req.id).map_err(invalid)?;
        let vector = vector_from_wire(&req.vector).map_err(invalid)?;

        let (delta, snapshot) = self.replication.replicate_endpoint(caller, vector).await;

        Ok(Response::new(pb::ReplResp {
            id: self.membership.id().to_string(),
            orset: Some(pb::OrSet::from(&delta)),
            vector: vector_to_wire(&snapshot),
        }))
    }
}
