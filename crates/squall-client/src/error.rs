//! Client driver error types.

use std::time::Duration;

use squall_core::SessionError;
use squall_proto::ProtocolError;

/// Errors surfaced while starting or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket setup or broker stream failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-format failure (broker blob or local frame building).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session state machine rejected an operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}
