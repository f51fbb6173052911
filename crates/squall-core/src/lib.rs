//! Squall session core logic.
//!
//! Pure state machine for one reliable-UDP client session, completely
//! decoupled from I/O. This enables deterministic testing: no sockets, no
//! timers, no mocking.
//!
//! # Architecture
//!
//! The session is implemented as a deterministic state machine isolated
//! from I/O, time, and scheduling. Time is passed into every method that
//! needs it; transitions return declarative [`session::SessionAction`]s
//! describing intended effects (transmit these bytes, deliver this packet
//! to the behavior graph, tear the transport down). A runtime — the tokio
//! driver in `squall-client`, or a unit test — executes the actions.
//!
//! # Components
//!
//! - [`session`]: handshake, sequencing, ack handling, retransmission
//!   sweep, liveness check, teardown
//! - [`pending`]: ordered store of packets awaiting acknowledgment
//! - [`error`]: session error types

pub mod error;
pub mod pending;
pub mod session;

pub use error::SessionError;
pub use pending::{PendingAckStore, PendingSend};
pub use session::{DisconnectReason, Session, SessionAction, SessionConfig, SessionState};
