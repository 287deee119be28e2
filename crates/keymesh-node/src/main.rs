//! CLI binary entry point for a keymesh node.
//!
//! Usage:
//!   keymesh-node [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Path to configuration TOML file
//!   -u, --uri <URI>        URI peers use to reach this node
//!   -l, --listen <ADDR>    RPC listen address (overrides config)
//!       --contact <URI>    Contact URI for joining an existing cluster
//!   -v, --verbose          Increase logging verbosity

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;

use keymesh_membership::MembershipManager;
use keymesh_node::config::NodeConfig;
use keymesh_node::rpc_server::ClusterService;
use keymesh_proto::constants;
use keymesh_proto::pb::cluster_server::ClusterServer;
use keymesh_state::ReplicationManager;

/// Keymesh node - eventually-consistent keyed-set replication.
#[derive(Parser, Debug)]
#[command(name = "keymesh-node")]
#[command(about = "Peer-to-peer eventually-consistent keyed-set replication node")]
#[command(version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// URI peers use to reach this node (e.g., http://10.0.0.5:7450).
    #[arg(short, long, value_name = "URI")]
    uri: Option<String>,

    /// RPC listen address (e.g., 0.0.0.0:7450).
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Contact URI for joining an existing cluster; omit to start a seed.
    #[arg(long, value_name = "URI")]
    contact: Option<String>,

    /// Increase logging verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration.
    let mut config = NodeConfig::load(cli.config.as_deref())?;

    // Apply CLI overrides.
    if let Some(uri) = cli.uri {
        config.node.uri = uri;
    }
    if let Some(listen) = cli.listen {
        config.node.listen_addr = listen;
    }
    if let Some(contact) = cli.contact {
        config.node.contact_uri = Some(contact);
    }

    // Adjust log level based on verbosity.
    let log_level = match cli.verbose {
        0 => &config.logging.level,
        1 => "debug",
        _ => "trace",
    };

    // Initialize logging.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    tracing::info!(
        uri = %config.node.uri,
        listen = %config.node.listen_addr,
        contact = config.node.contact_uri.as_deref().unwrap_or("<seed>"),
        "Starting keymesh node"
    );

    // Construct the managers and start their background tasks.
    let membership = MembershipManager::new(
        config.node.uri.clone(),
        config.node.contact_uri.clone(),
        config.membership_config(),
    );
    let replication =
        ReplicationManager::new(Arc::clone(&membership), config.replication_config());

    membership.spawn_background_tasks();
    replication.spawn_background_tasks();

    // Reporter: periodic peer-table and set dumps, visible at debug level.
    {
        let membership = Arc::clone(&membership);
        let replication = Arc::clone(&replication);
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(constants::REPORT_INTERVAL_SECS));
            loop {
                tick.tick().await;
                membership.log_peer_table().await;
                replication.log_set().await;
            }
        });
    }

    // Serve the cluster endpoints (h2c) until the process exits.
    let addr = config.listen_socket_addr()?;
    tracing::info!(listen = %addr, "Cluster RPC server listening");

    let service = ClusterService::new(membership, replication);
    Server::builder()
        .add_service(ClusterServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
