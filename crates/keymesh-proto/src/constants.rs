/// Gossip worker tick: one greet attempt (while uninitialized) or one
/// gossip round per tick.
pub const GOSSIP_INTERVAL_MS: u64 = 20;

/// Interval between dead-peer scans.
pub const SLEEPER_INTERVAL_SECS: u64 = 5;

/// A peer not seen for this long is presumed dead.
pub const PEER_TIMEOUT_SECS: u64 = 15;

/// Interval between replication pulls.
pub const PULL_INTERVAL_SECS: u64 = 1;

/// Per-call deadline for outbound RPCs.
pub const RPC_TIMEOUT_SECS: u64 = 5;

/// Interval between peer-table / set reports (debug logging only).
pub const REPORT_INTERVAL_SECS: u64 = 5;
