//! Node execution error types.

/// Errors raised while executing a behavior node.
///
/// These are caught at the chain boundary: the failing node's chain halts,
/// sibling chains and other triggered matches keep running, and nothing
/// propagates to the session loops.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The session driver could not send a packet.
    #[error("send failed: {0}")]
    Send(String),

    /// An assertion node failed with stop-on-failure set.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// A named accessor was not found in the registry.
    #[error("accessor '{0}' is not registered")]
    UnknownAccessor(String),

    /// A custom handler or accessor reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),
}
