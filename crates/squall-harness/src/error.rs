//! Harness error types.

use squall_client::ClientError;

/// Errors surfaced while orchestrating a swarm.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The behavior graph failed validation; running it would misbehave.
    #[error("graph '{graph}' failed validation with {errors} error(s)")]
    InvalidGraph {
        /// Graph name.
        graph: String,
        /// Number of error-severity issues.
        errors: usize,
    },

    /// No bot could be started at all.
    #[error("no bot session could be started ({attempted} attempted)")]
    NoSessions {
        /// How many sessions were attempted.
        attempted: u16,
    },

    /// Socket setup failure in the sim infrastructure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A client-level failure worth aborting for.
    #[error(transparent)]
    Client(#[from] ClientError),
}
