//! Configuration loading from TOML and environment variables.
//!
//! The node reads its configuration from:
//! 1. A TOML config file (optional)
//! 2. Environment variables (override TOML values)
//! 3. CLI flags (applied last, in main)
//!
//! Environment variable prefix: KEYMESH_

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use keymesh_membership::MembershipConfig;
use keymesh_proto::constants;
use keymesh_state::ReplicationConfig;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity and addressing.
    #[serde(default)]
    pub node: NodeSection,
    /// Background task intervals.
    #[serde(default)]
    pub timing: TimingSection,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Identity and addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// URI peers use to reach this node.
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Address the RPC server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Contact URI for joining an existing cluster. Absent means this
    /// node is a seed.
    #[serde(default)]
    pub contact_uri: Option<String>,
}

/// Background task intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,
    #[serde(default = "default_sleeper_interval_secs")]
    pub sleeper_interval_secs: u64,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default = "default_pull_interval_secs")]
    pub pull_interval_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level filter (e.g., "info", "debug", "keymesh=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
}

// -- Defaults --

fn default_uri() -> String {
    "http://127.0.0.1:7450".to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1:7450".to_string()
}
fn default_gossip_interval_ms() -> u64 {
    constants::GOSSIP_INTERVAL_MS
}
fn default_sleeper_interval_secs() -> u64 {
    constants::SLEEPER_INTERVAL_SECS
}
fn default_peer_timeout_secs() -> u64 {
    constants::PEER_TIMEOUT_SECS
}
fn default_pull_interval_secs() -> u64 {
    constants::PULL_INTERVAL_SECS
}
fn default_rpc_timeout_secs() -> u64 {
    constants::RPC_TIMEOUT_SECS
}
fn default_log_level() -> String {
    "info".to_string()
}

// -- Trait impls --

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            timing: TimingSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            listen_addr: default_listen_addr(),
            contact_uri: None,
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            gossip_interval_ms: default_gossip_interval_ms(),
            sleeper_interval_secs: default_sleeper_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            pull_interval_secs: default_pull_interval_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, with environment variable
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = if let Some(path) = path {
            if path.exists() {
                Self::from_file(path)?
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KEYMESH_URI") {
            self.node.uri = val;
        }
        if let Ok(val) = std::env::var("KEYMESH_LISTEN_ADDR") {
            self.node.listen_addr = val;
        }
        if let Ok(val) = std::env::var("KEYMESH_CONTACT_URI") {
            self.node.contact_uri = Some(val);
        }
        if let Ok(val) = std::env::var("KEYMESH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("KEYMESH_GOSSIP_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.timing.gossip_interval_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("KEYMESH_PULL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.timing.pull_interval_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("KEYMESH_PEER_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.timing.peer_timeout_secs = secs;
            }
        }
    }

    /// Parse the listen address into a SocketAddr.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.node.listen_addr.parse()?)
    }

    /// Intervals for the membership manager.
    pub fn membership_config(&self) -> MembershipConfig {
        MembershipConfig {
            gossip_interval: Duration::from_millis(self.timing.gossip_interval_ms),
            sleeper_interval: Duration::from_secs(self.timing.sleeper_interval_secs),
            peer_timeout: Duration::from_secs(self.timing.peer_timeout_secs),
            rpc_timeout: Duration::from_secs(self.timing.rpc_timeout_secs),
        }
    }

    /// Intervals for the replication manager.
    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            pull_interval: Duration::from_secs(self.timing.pull_interval_secs),
            rpc_timeout: Duration::from_secs(self.timing.rpc_timeout_secs),
        }
    }
}
