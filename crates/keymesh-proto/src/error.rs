use thiserror::Error;

/// Errors raised while validating or converting wire messages.
///
/// Every variant maps to an invalid-argument rejection at the RPC boundary;
/// none of them should be reachable for messages our own code produced.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),

    #[error("invalid uri: {0:?}")]
    InvalidUri(String),

    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("counter must be non-zero")]
    ZeroCounter,

    #[error("missing last-seen timestamp")]
    MissingTimestamp,

    #[error("timestamp out of range: {0}s")]
    InvalidTimestamp(i64),

    #[error("empty set key")]
    EmptyKey,
}
