//! Lazily connected clients for peer endpoints.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::pb::cluster_client::ClusterClient;

/// Build a client for `uri` without dialing.
///
/// The connection is established on first use and transport failures
/// surface per call, so the periodic loops treat an unreachable peer like
/// any other failed round. Safe to clone and invoke concurrently.
pub fn connect_lazy(
    uri: &str,
    timeout: Duration,
) -> Result<ClusterClient<Channel>, tonic::transport::Error> {
    let channel = Endpoint::from_shared(uri.to_string())?
        .timeout(timeout)
        .connect_lazy();
    Ok(ClusterClient::new(channel))
}
