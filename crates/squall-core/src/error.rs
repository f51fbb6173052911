//! Session error types.

use squall_proto::{PacketSequence, ProtocolError};

use crate::session::SessionState;

/// Errors surfaced by the session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An operation was attempted in a state that does not permit it.
    #[error("operation '{operation}' invalid in state {state:?}")]
    InvalidState {
        /// State the session was in.
        state: SessionState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A pending entry already exists for this sequence.
    ///
    /// Sequences are assigned monotonically, so hitting this means the
    /// send path broke its own invariant.
    #[error("duplicate pending sequence {sequence}")]
    DuplicateSequence {
        /// The colliding sequence.
        sequence: PacketSequence,
    },

    /// Wire-format or packet-protection failure.
    ///
    /// On the receive path these are logged and the datagram dropped; the
    /// session keeps running.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
