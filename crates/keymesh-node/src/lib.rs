//! Keymesh node - RPC server binding and process configuration
//!
//! Ties the membership and replication managers to the `keymesh.v1.Cluster`
//! service and to the process surface (CLI, TOML config, logging).

pub mod config;
pub mod rpc_server;
