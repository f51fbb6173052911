//! Session state machine: handshake, sequencing, retransmission, liveness.
//!
//! # Architecture: Action-Based State Machine
//!
//! Methods accept time as a parameter and return `Vec<SessionAction>`;
//! the driver executes the actions (transmit datagrams, deliver packets to
//! the behavior graph, tear the transport down). Keeping the machine free
//! of I/O means the whole protocol path is testable with byte slices and
//! two `Instant`s.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect  ┌────────────┐ ack for seq 0 ┌───────────┐
//! │ Disconnected │─────────>│ Connecting │──────────────>│ Connected │
//! └──────────────┘          └────────────┘               └───────────┘
//!        ▲                        │                            │
//!        │                        │ retransmit ceiling         │ ceiling /
//!        │ teardown_complete      ▼                            │ liveness /
//!        │                  ┌───────────────┐                  │ disconnect
//!        └──────────────────│ Disconnecting │<─────────────────┘
//!                           └───────────────┘
//! ```
//!
//! The lifecycle is linear; a session that reached Disconnected can start
//! a fresh handshake cycle with reset counters.
//!
//! # Sequencing
//!
//! The Connect packet reserves sequence 0. Application packets take
//! strictly increasing sequences starting at 2; the gap after the reserved
//! handshake sequence is never assigned.

use std::fmt;
use std::time::{Duration, Instant};

use squall_proto::types::{FIRST_APP_SEQUENCE, HANDSHAKE_SEQUENCE};
use squall_proto::{
    Frame, PacketCrypto, PacketDirection, PacketId, PacketSequence, PacketType,
};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::pending::PendingAckStore;

/// Why a session tore down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A pending packet exhausted its retransmission budget.
    RetransmissionCeiling {
        /// The sequence that gave up.
        sequence: PacketSequence,
    },
    /// No new receive sequence observed across a liveness interval.
    LivenessTimeout,
    /// The server sent a Disconnect frame.
    Remote,
    /// Local caller asked for teardown.
    Local,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetransmissionCeiling { sequence } => {
                write!(f, "retransmission ceiling exceeded for sequence {sequence}")
            }
            Self::LivenessTimeout => f.write_str("server liveness timeout"),
            Self::Remote => f.write_str("server requested disconnect"),
            Self::Local => f.write_str("local disconnect"),
        }
    }
}

/// Declarative effects returned by state transitions.
///
/// The driver executes them in order:
/// - `Transmit`: send these bytes over the UDP socket
/// - `Deliver`: hand the decoded application packet to the graph dispatcher
/// - `StartLiveness`: the handshake completed, start the liveness interval
/// - `Teardown`: stop the loops and release the transport, then call
///   [`Session::teardown_complete`]
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Send these encoded bytes to the server.
    Transmit(Vec<u8>),
    /// Deliver a decoded application packet to the behavior graph.
    Deliver {
        /// Application packet id from the opened header.
        packet_id: PacketId,
        /// Decoded frame with the read cursor at the payload start.
        frame: Frame,
    },
    /// Handshake acknowledged; the liveness loop may start.
    StartLiveness,
    /// Stop all loops and release the transport.
    Teardown {
        /// Why the session is going away.
        reason: DisconnectReason,
    },
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live connection; eligible for a fresh handshake.
    Disconnected,
    /// Connect packet sent, waiting for its acknowledgment.
    Connecting,
    /// Handshake acknowledged; application traffic flows.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

/// Transport timing knobs. Fixed constants, not adaptive.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Age after which a pending packet is retransmitted.
    pub retransmission_timeout: Duration,
    /// Retransmissions allowed before the session gives up.
    pub max_retransmissions: u16,
    /// How often the driver runs the retransmission sweep.
    pub retransmit_tick: Duration,
    /// Liveness check interval; no new receive sequence across one
    /// interval means the server is treated as unresponsive.
    pub liveness_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retransmission_timeout: Duration::from_millis(32),
            max_retransmissions: 16,
            retransmit_tick: Duration::from_millis(10),
            liveness_interval: Duration::from_secs(10),
        }
    }
}

/// One logical client connection.
///
/// Exclusively owned by one simulated client; the driver serializes all
/// calls through a single lock, which also covers the pending store and
/// the sequence counter.
pub struct Session {
    session_id: u16,
    crypto: PacketCrypto,
    config: SessionConfig,
    state: SessionState,
    next_send_sequence: PacketSequence,
    last_recv_sequence: PacketSequence,
    liveness_mark: PacketSequence,
    pending: PendingAckStore,
}

impl Session {
    /// Create a session from a broker-issued identity.
    #[must_use]
    pub fn new(session_id: u16, crypto: PacketCrypto, config: SessionConfig) -> Self {
        Self {
            session_id,
            crypto,
            config,
            state: SessionState::Disconnected,
            next_send_sequence: FIRST_APP_SEQUENCE,
            last_recv_sequence: 0,
            liveness_mark: 0,
            pending: PendingAckStore::new(),
        }
    }

    /// Session id assigned by the broker.
    #[must_use]
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the handshake has been acknowledged.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Timing configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of packets awaiting acknowledgment.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start the handshake: build the Connect packet (reserved sequence
    /// 0), enqueue it for retransmission, and emit it.
    ///
    /// # Errors
    /// `InvalidState` unless the session is Disconnected.
    pub fn connect(&mut self, now: Instant) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState { state: self.state, operation: "connect" });
        }

        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Connect);
        frame.set_sequence(HANDSHAKE_SEQUENCE);
        frame.write_u16(self.session_id)?;
        let wire = frame.encode();

        self.pending.enqueue(HANDSHAKE_SEQUENCE, wire.clone(), now)?;
        self.state = SessionState::Connecting;
        debug!(session_id = self.session_id, "handshake started");

        Ok(vec![SessionAction::Transmit(wire)])
    }

    /// Send one application packet: assign the next sequence, stamp the
    /// header, seal, frame, and enqueue for retransmission.
    ///
    /// Returns once the transmit action is emitted, not once the packet is
    /// acknowledged.
    ///
    /// # Errors
    /// `InvalidState` unless the session is Connected.
    pub fn send_packet(
        &mut self,
        mut frame: Frame,
        packet_id: PacketId,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::InvalidState { state: self.state, operation: "send_packet" });
        }

        let sequence = self.next_send_sequence;
        self.next_send_sequence += 1;

        frame.set_packet_type(PacketType::Send);
        frame.set_sequence(sequence);
        frame.set_packet_id(packet_id);
        self.crypto.seal(&mut frame, PacketDirection::client_outbound(PacketType::Send))?;
        let wire = frame.encode();

        self.pending.enqueue(sequence, wire.clone(), now)?;
        debug!(session_id = self.session_id, sequence, %packet_id, "packet sent");

        Ok(vec![SessionAction::Transmit(wire)])
    }

    /// Feed one received datagram through decode and dispatch.
    ///
    /// # Errors
    /// Decode and authentication failures bubble up as
    /// [`SessionError::Protocol`]; the driver logs them and drops the
    /// datagram — the session keeps running.
    pub fn on_datagram(&mut self, wire: &[u8]) -> Result<Vec<SessionAction>, SessionError> {
        let mut frame = Frame::decode(wire)?;
        let ty = frame.packet_type()?;
        self.crypto.open(&mut frame, PacketDirection::server_outbound(ty))?;

        let sequence = frame.sequence();
        if sequence > self.last_recv_sequence {
            self.last_recv_sequence = sequence;
        }

        match ty {
            PacketType::Send => {
                let ack = self.build_ack(PacketType::SendReply, sequence)?;
                let packet_id = frame.packet_id();
                debug!(session_id = self.session_id, sequence, %packet_id, "core packet received");
                Ok(vec![
                    SessionAction::Transmit(ack),
                    SessionAction::Deliver { packet_id, frame },
                ])
            }
            PacketType::Heartbeat => {
                let ack = self.build_ack(PacketType::HeartbeatReply, sequence)?;
                Ok(vec![SessionAction::Transmit(ack)])
            }
            PacketType::SendReply => Ok(self.on_ack(sequence)),
            PacketType::Disconnect => {
                debug!(session_id = self.session_id, "server requested disconnect");
                self.state = SessionState::Disconnecting;
                self.pending.clear();
                Ok(vec![SessionAction::Teardown { reason: DisconnectReason::Remote }])
            }
            PacketType::HeartbeatReply | PacketType::Connect | PacketType::Invalid => {
                warn!(session_id = self.session_id, %ty, "unexpected packet type, dropped");
                Ok(vec![])
            }
        }
    }

    fn on_ack(&mut self, sequence: PacketSequence) -> Vec<SessionAction> {
        let removed = self.pending.remove(sequence);
        if !removed {
            debug!(session_id = self.session_id, sequence, "ack for unknown sequence");
        }

        if sequence == HANDSHAKE_SEQUENCE && self.state == SessionState::Connecting {
            self.state = SessionState::Connected;
            self.liveness_mark = self.last_recv_sequence;
            debug!(session_id = self.session_id, "handshake acknowledged, session connected");
            return vec![SessionAction::StartLiveness];
        }

        vec![]
    }

    /// Retransmission sweep. For every pending entry older than the
    /// timeout: resend and bump its counter, unless the counter already
    /// reached the ceiling — then the session gives up and tears down.
    pub fn tick_retransmit(&mut self, now: Instant) -> Vec<SessionAction> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Connected) {
            return vec![];
        }

        let mut actions = Vec::new();
        for sequence in self.pending.snapshot() {
            let Some(entry) = self.pending.get(sequence) else { continue };
            if !entry.is_due(now, self.config.retransmission_timeout) {
                continue;
            }
            if entry.exceeded(self.config.max_retransmissions) {
                warn!(
                    session_id = self.session_id,
                    sequence,
                    retransmissions = entry.retransmissions(),
                    "retransmission ceiling exceeded"
                );
                return self
                    .force_disconnect(DisconnectReason::RetransmissionCeiling { sequence });
            }
            if let Some(entry) = self.pending.refresh(sequence, now) {
                debug!(
                    session_id = self.session_id,
                    sequence,
                    retransmissions = entry.retransmissions(),
                    "retransmitting"
                );
                actions.push(SessionAction::Transmit(entry.wire().to_vec()));
            }
        }
        actions
    }

    /// Liveness check. If no new sequence arrived since the previous
    /// check, the server is treated as unresponsive and the session tears
    /// down.
    pub fn tick_liveness(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Connected {
            return vec![];
        }

        if self.last_recv_sequence == self.liveness_mark {
            warn!(session_id = self.session_id, "server is not alive");
            return self.force_disconnect(DisconnectReason::LivenessTimeout);
        }

        self.liveness_mark = self.last_recv_sequence;
        vec![]
    }

    /// Idempotent local teardown.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        match self.state {
            SessionState::Disconnected | SessionState::Disconnecting => vec![],
            SessionState::Connecting | SessionState::Connected => {
                self.force_disconnect(DisconnectReason::Local)
            }
        }
    }

    /// Finish teardown after the driver released the transport: reset
    /// counters and pending state, return to Disconnected. The session is
    /// then eligible for a fresh handshake cycle.
    pub fn teardown_complete(&mut self) {
        self.state = SessionState::Disconnected;
        self.next_send_sequence = FIRST_APP_SEQUENCE;
        self.last_recv_sequence = 0;
        self.liveness_mark = 0;
        self.pending.clear();
        debug!(session_id = self.session_id, "session torn down");
    }

    fn force_disconnect(&mut self, reason: DisconnectReason) -> Vec<SessionAction> {
        self.state = SessionState::Disconnecting;
        self.pending.clear();

        let mut frame = Frame::new();
        frame.set_packet_type(PacketType::Disconnect);
        frame.set_sequence(HANDSHAKE_SEQUENCE);
        let wire = frame.encode();

        vec![
            SessionAction::Transmit(wire),
            SessionAction::Teardown { reason },
        ]
    }

    fn build_ack(
        &self,
        reply_ty: PacketType,
        sequence: PacketSequence,
    ) -> Result<Vec<u8>, SessionError> {
        let mut frame = Frame::new();
        frame.set_packet_type(reply_ty);
        frame.set_sequence(sequence);
        self.crypto.seal(&mut frame, PacketDirection::client_outbound(reply_ty))?;
        Ok(frame.encode())
    }
}
